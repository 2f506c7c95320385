//! Run configurations read from files and turned into pipelines.

use std::fs;

use clap::Parser;
use tempfile::TempDir;

use iceberg::cli::{Cli, Invocation};
use iceberg::config::{AnalysisConfig, Config, UseCaseKind};
use iceberg::discovery::ImageRecord;
use iceberg::executor::{Executor, HandoffEngine, ResourceConfig};
use iceberg::usecase::{build_analysis_pipelines, UseCase};
use iceberg::Error;

fn invocation(path: &std::path::Path) -> iceberg::Result<Invocation> {
    let config_arg = format!("--config={}", path.display());
    Cli::try_parse_from(["iceberg", config_arg.as_str()])
        .unwrap()
        .into_invocation()
}

#[test]
fn test_toml_seals_config() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seals.toml");
    fs::write(
        &path,
        r#"
[general]
resource = "xsede.bridges"
walltime = 120
cpus = 28
gpus = 2
input_path = ["/pylon5/images/a", "/pylon5/images/b"]
output_path = "/pylon5/results"
rmq_endpoint = "rmq.example.org"
rmq_port = 5672

[analysis]
which = "seals"
scale_bands = "299"
model = "seals.tar"
model_path = "/pylon5/models"
model_arch = "UnetCntWRN"
hyperparameters = "A"
ve_seals = "/pylon5/envs/seals"
"#,
    )
    .unwrap();

    let config = match invocation(&path).unwrap() {
        Invocation::Analysis(config) => config,
        other => panic!("Expected analysis, got {:?}", other),
    };
    assert_eq!(config.analysis.kind(), UseCaseKind::Seals);
    assert_eq!(config.general.input_path.len(), 2);

    let resource = ResourceConfig::with_env(&config.general, |_| None).unwrap();
    assert!(!resource.is_local());
    assert_eq!(resource.engine_description()["schema"], "gsissh");
    assert_eq!(resource.broker.as_ref().unwrap().endpoint, "rmq.example.org");

    let images = vec![ImageRecord::new("/pylon5/images/a/wv.tif", Some(50))];
    let pipelines = build_analysis_pipelines(&images, &config, &resource).unwrap();
    assert_eq!(pipelines.len(), 1);
    let tiling = &pipelines[0].stages[0].tasks[0];
    assert_eq!(
        tiling.pre_exec,
        vec![
            "module load psc_path/1.1",
            "module load slurm/default",
            "module load intel/17.4",
            "module load python3",
            "module load cuda",
            "source /pylon5/envs/seals/bin/activate",
            "export PYTHONPATH=/pylon5/envs/seals/lib/python3.5/site-packages",
        ]
    );
    assert_eq!(tiling.lfs_per_process, 50);
}

#[test]
fn test_json_config_takes_broker_from_env() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rivers.json");
    fs::write(
        &path,
        r#"{
            "general": {
                "resource": "xsede.bridges2",
                "walltime": 60,
                "cpus": 4,
                "input_path": "/ocean/images",
                "output_path": "/ocean/out"
            },
            "analysis": {"which": "rivers", "tile_size": 224, "step": 112, "weights_path": "/w.h5"}
        }"#,
    )
    .unwrap();

    let config = match invocation(&path).unwrap() {
        Invocation::Analysis(config) => config,
        other => panic!("Expected analysis, got {:?}", other),
    };
    assert_eq!(config.general.rmq_endpoint, None);

    let resource = ResourceConfig::with_env(&config.general, |key| match key {
        "RMQ_ENDPOINT" => Some("rmq.example.org".to_string()),
        "RMQ_PORT" => Some("5672".to_string()),
        _ => None,
    })
    .unwrap();
    let broker = resource.broker.as_ref().unwrap();
    assert_eq!(broker.endpoint, "rmq.example.org");
    assert_eq!(broker.port, 5672);

    let workdir = TempDir::new().unwrap();
    let use_case = UseCase::with_env(&config, &resource, |_| None).unwrap();
    let executor = Executor::new("env-broker", resource, use_case, HandoffEngine::new(workdir.path()));
    assert!(executor.is_ok());
}

#[test]
fn test_json_config_missing_fields() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rivers.json");
    fs::write(
        &path,
        r#"{"general": {"resource": "xsede.bridges2", "cpus": 4},
            "analysis": {"which": "rivers", "tile_size": 224}}"#,
    )
    .unwrap();

    match invocation(&path) {
        Err(Error::MissingField(fields)) => {
            assert_eq!(fields, "walltime, input_path, output_path, step, weights_path");
        }
        other => panic!("Expected MissingField, got {:?}", other),
    }
}

#[test]
fn test_malformed_config_file() {
    let temp = TempDir::new().unwrap();
    let json = temp.path().join("broken.json");
    fs::write(&json, "{ not json").unwrap();
    assert!(matches!(invocation(&json), Err(Error::Json(_))));

    let toml = temp.path().join("broken.toml");
    fs::write(&toml, "[general\nresource = 1").unwrap();
    assert!(matches!(invocation(&toml), Err(Error::TomlParse(_))));

    let unknown = temp.path().join("whales.json");
    fs::write(&unknown, r#"{"general": {}, "analysis": {"which": "whales"}}"#).unwrap();
    assert!(matches!(invocation(&unknown), Err(Error::Json(_))));
}

#[test]
fn test_landcover_config_parses_but_does_not_build() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("landcover.json");
    fs::write(
        &path,
        r#"{
            "general": {
                "resource": "local.localhost",
                "walltime": 10,
                "cpus": 1,
                "input_path": "/images",
                "output_path": "/out"
            },
            "analysis": {
                "which": "landcover",
                "spec_lib": "lib.csv",
                "roi_sel": "roi.shp",
                "atmcorr_model": "6s",
                "landcover_lib": "lc"
            }
        }"#,
    )
    .unwrap();

    let config: Config = match invocation(&path).unwrap() {
        Invocation::Analysis(config) => config,
        other => panic!("Expected analysis, got {:?}", other),
    };
    assert!(matches!(config.analysis, AnalysisConfig::Landcover(_)));

    let resource = ResourceConfig::with_env(&config.general, |_| None).unwrap();
    assert!(resource.is_local());
    assert!(matches!(
        build_analysis_pipelines(&[], &config, &resource),
        Err(Error::UnsupportedUseCase(UseCaseKind::Landcover))
    ));
}
