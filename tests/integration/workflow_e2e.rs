//! End-to-end run tests: discovery, analysis and teardown through the
//! executor.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use iceberg::cli::run_analysis;
use iceberg::config::UseCaseKind;
use iceberg::executor::{handoff, BrokerConfig, Executor};
use iceberg::usecase::UseCase;
use iceberg::workflow::{RunPhase, RunStatus};
use iceberg::Error;

use crate::fixtures::*;

#[test]
fn test_seals_run_end_to_end() {
    let images = ImageDir::new(&[("img2.tif", 10), ("img1.tif", 3 * MB), ("notes.txt", 5)]);
    let workdir = TempDir::new().unwrap();
    let config = seals_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    let summary = Executor::new("seals-run", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.phase, RunPhase::Complete);
    assert_eq!(summary.use_case, UseCaseKind::Seals);
    assert_eq!(summary.images_discovered, 2);
    assert_eq!(summary.pipelines_submitted, 2);

    assert_eq!(engine.calls[0], Call::Configure("seals-run".to_string()));
    assert_eq!(
        engine.calls[1],
        Call::StageShared(vec![PathBuf::from("/models/seals.tar")])
    );
    assert_eq!(engine.calls.last(), Some(&Call::Terminate));
    assert_eq!(engine.terminations(), 1);

    let submissions = engine.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].phase, RunPhase::Discovery);
    assert_eq!(submissions[0].pipelines[0].name, "Disc");

    let table = fs::read_to_string(workdir.path().join("images0.csv")).unwrap();
    let rows: Vec<_> = table.lines().collect();
    assert_eq!(rows[0], "Filename,Size");
    assert!(rows[1].ends_with("img1.tif,3"));
    assert!(rows[2].ends_with("img2.tif,1"));

    let analysis = submissions[1];
    assert_eq!(analysis.phase, RunPhase::Analysis);
    let first = &analysis.pipelines[0];
    assert_eq!(first.name, "P0");
    let tiling = &first.stages[0].tasks[0];
    assert!(tiling.link_input_data.contains(&images.image("img1.tif")));
    assert_eq!(tiling.lfs_per_process, 3);
    assert_eq!(
        tiling.pre_exec,
        vec![
            "source /envs/seals/bin/activate",
            "export PYTHONPATH=/envs/seals/lib/python3.5/site-packages",
        ]
    );
    assert_eq!(
        first.stages[1].tasks[0].colocate.as_deref(),
        Some(tiling.name.as_str())
    );
    assert_eq!(analysis.pipelines[1].name, "P1");
}

#[test]
fn test_penguins_discovers_png() {
    let images = ImageDir::new(&[("a.png", 100), ("b.tif", 100)]);
    let workdir = TempDir::new().unwrap();
    let config = penguins_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    let summary = Executor::new("penguins-run", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();

    assert_eq!(summary.images_discovered, 1);
    let analysis = engine.submissions()[1];
    let task = &analysis.pipelines[0].stages[0].tasks[0];
    assert_eq!(task.executable, "iceberg_penguins.detect");
    assert_eq!(task.arguments.last().map(String::as_str), Some("a.png"));
    assert!(task.gpu_reqs.is_some());
}

#[test]
fn test_multiple_search_paths_continue_numbering() {
    let first = ImageDir::new(&[("a.tif", MB), ("b.tif", MB)]);
    let second = ImageDir::new(&[("c.tif", 2 * MB)]);
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&[first.path_string(), second.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    let summary = Executor::new("rivers-run", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();

    assert_eq!(summary.images_discovered, 3);
    let submissions = engine.submissions();
    let discovery = &submissions[0].pipelines[0];
    assert_eq!(discovery.stages[0].tasks.len(), 2);
    assert!(workdir.path().join("images1.csv").exists());

    let names: Vec<_> = submissions[1].pipelines.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["P0", "P1", "P2"]);
    let last = &submissions[1].pipelines[2];
    assert_eq!(last.stages.len(), 3);
    assert!(last.stages[0].tasks[0]
        .link_input_data
        .contains(&second.image("c.tif")));
    assert_eq!(last.stages[0].tasks[0].lfs_per_process, 2);
}

#[test]
fn test_empty_discovery_skips_analysis() {
    let images = ImageDir::new(&[("readme.md", 1)]);
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    let summary = Executor::new("empty-run", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.images_discovered, 0);
    assert_eq!(summary.pipelines_submitted, 0);
    assert_eq!(engine.submissions().len(), 1);
    assert_eq!(engine.terminations(), 1);
}

#[test]
fn test_submit_failure_terminates_once() {
    let images = ImageDir::new(&[("a.tif", MB)]);
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    engine.fail_submit = Some(RunPhase::Analysis);
    let result = Executor::new("failing-run", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run();

    assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("analysis")));
    assert_eq!(engine.terminations(), 1);
    assert_eq!(engine.calls.last(), Some(&Call::Terminate));
}

#[test]
fn test_terminate_failure_does_not_mask_submit_error() {
    let images = ImageDir::new(&[("a.tif", MB)]);
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::new();
    engine.fail_submit = Some(RunPhase::Discovery);
    engine.fail_terminate = true;
    let result = Executor::new("double-fault", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run();

    assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("discovery")));
    assert_eq!(engine.terminations(), 1);
}

#[test]
fn test_terminate_failure_after_success_is_logged_only() {
    let workdir = TempDir::new().unwrap();
    let images = ImageDir::new(&[]);
    let config = rivers_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    engine.fail_terminate = true;
    let summary = Executor::new("teardown-fault", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(engine.terminations(), 1);
}

#[test]
fn test_no_search_paths_is_a_precondition_error() {
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&[], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::new();
    let result = Executor::new("no-paths", resource, use_case, &mut engine)
        .unwrap()
        .run();
    assert!(matches!(result, Err(Error::Precondition(_))));
    assert!(engine.submissions().is_empty());
    assert_eq!(engine.terminations(), 1);
}

#[test]
fn test_malformed_table_fails_run() {
    let workdir = TempDir::new().unwrap();
    let config = rivers_config(&["/remote/images".to_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::writing_table(
        workdir.path().join("images0.csv"),
        "Filename,Size\n/x/a.tif,huge\n",
    );
    let result = Executor::new("bad-table", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run();
    assert!(matches!(result, Err(Error::InvalidTable { line: 2, .. })));
    assert_eq!(engine.terminations(), 1);
}

#[test]
fn test_stale_tables_are_not_read() {
    let images = ImageDir::new(&[("fresh.tif", MB)]);
    let workdir = TempDir::new().unwrap();
    fs::write(
        workdir.path().join("images0.csv"),
        "Filename,Size\n/old/run/stale.tif,4\n",
    )
    .unwrap();
    let config = rivers_config(&[images.path_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::running_kernel(workdir.path());
    let summary = Executor::new("rerun", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();

    assert_eq!(summary.images_discovered, 1);
    let task = &engine.submissions()[1].pipelines[0].stages[0].tasks[0];
    assert!(task.link_input_data.contains(&images.image("fresh.tif")));
    assert!(!task.link_input_data.contains("/old/run/stale.tif"));
}

#[test]
fn test_stale_table_without_discovery_output_means_no_images() {
    let workdir = TempDir::new().unwrap();
    fs::write(
        workdir.path().join("images0.csv"),
        "Filename,Size\n/old/run/stale.tif,4\n",
    )
    .unwrap();
    let config = rivers_config(&["/remote/images".to_string()], workdir.path());
    let resource = resource(&config);
    let use_case = UseCase::from_config(&config, &resource).unwrap();

    let mut engine = RecordingEngine::new();
    let summary = Executor::new("silent-discovery", resource, use_case, &mut engine)
        .unwrap()
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir.path())
        .run()
        .unwrap();
    assert_eq!(summary.images_discovered, 0);
    assert!(!workdir.path().join("images0.csv").exists());
}

#[test]
fn test_handoff_run_waits_for_orchestrator() {
    let workdir = TempDir::new().unwrap();
    let table = workdir.path().join("images0.csv");
    fs::write(&table, "Filename,Size\n/old/run/stale.tif,4\n").unwrap();

    let mut config = rivers_config(&["/remote/images".to_string()], workdir.path());
    config.general.name = Some("handoff-run".to_string());
    config.general.rmq_endpoint = Some("localhost".to_string());
    config.general.rmq_port = Some(5672);

    let run_dir = workdir.path().join("handoff").join("handoff-run");
    let orchestrator = orchestrate(
        run_dir.clone(),
        vec![
            Ack::done("workflow-000-discovery.json").with_table(
                table,
                "Filename,Size\n/remote/images/a.tif,12\n/remote/images/b.tif,7\n",
            ),
            Ack::done("workflow-001-analysis.json"),
        ],
    );
    let summary = run_analysis(&config).unwrap();
    orchestrator.join().unwrap();

    assert_eq!(summary.name, "handoff-run");
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.images_discovered, 2);
    assert_eq!(summary.pipelines_submitted, 2);

    assert!(run_dir.join(handoff::RESOURCE_FILE).exists());
    assert!(run_dir.join("workflow-000-discovery.done").exists());
    let analysis: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(run_dir.join("workflow-001-analysis.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(analysis["pipelines"].as_array().unwrap().len(), 2);
    assert_eq!(analysis["pipelines"][1]["name"], "P1");
    assert!(!analysis.to_string().contains("stale.tif"));

    let session: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join(handoff::SESSION_FILE)).unwrap())
            .unwrap();
    assert_eq!(session["terminated"], true);
    assert_eq!(session["submissions"], 2);
}

#[test]
fn test_handoff_discovery_failure_ends_run() {
    let workdir = TempDir::new().unwrap();
    let mut config = rivers_config(&["/remote/images".to_string()], workdir.path());
    config.general.name = Some("lost-pilot".to_string());
    config.general.rmq_endpoint = Some("localhost".to_string());
    config.general.rmq_port = Some(5672);

    let run_dir = workdir.path().join("handoff").join("lost-pilot");
    let orchestrator = orchestrate(
        run_dir.clone(),
        vec![Ack::failed("workflow-000-discovery.json", "pilot lost")],
    );
    let result = run_analysis(&config);
    orchestrator.join().unwrap();

    assert!(matches!(result, Err(Error::Engine(msg)) if msg.ends_with("pilot lost")));
    assert!(!run_dir.join("workflow-001-analysis.json").exists());
    assert!(run_dir.join(handoff::SESSION_FILE).exists());
}

#[test]
fn test_handoff_run_requires_broker() {
    let workdir = TempDir::new().unwrap();
    let mut config = rivers_config(&["/remote/images".to_string()], workdir.path());
    config.general.rmq_endpoint = None;
    config.general.rmq_port = None;
    assert!(matches!(run_analysis(&config), Err(Error::Precondition(_))));

    let broker = BrokerConfig::from_parts(Some("localhost".to_string()), None, None, None);
    assert!(matches!(broker, Err(Error::Config(_))));
}
