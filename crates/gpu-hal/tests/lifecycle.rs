//! Integration tests for bringing up and tearing down the compute context.
//!
//! Program sources are written to a temporary directory so the resource
//! loading path and the include options derived from the source root are
//! covered. Everything runs on the `FakeDriver`.

use std::sync::Arc;

use ts_common::{ClStatus, ComputeConfig, DeviceClass};
use ts_gpu_hal::fake::{Call, FailPoint, FakeDriver, FakePlatform};
use ts_gpu_hal::{ComputeContext, ComputeService, ProgramSource};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_program(dir: &tempfile::TempDir, name: &str, text: &str) {
    std::fs::write(dir.path().join(name), text).expect("write program source");
}

fn rooted_config(dir: &tempfile::TempDir) -> ComputeConfig {
    ComputeConfig {
        program_src_root: Some(dir.path().to_path_buf()),
        build_options: Some("-cl-mad-enable".to_string()),
        ..ComputeConfig::enabled()
    }
}

fn build_options(fake: &FakeDriver) -> Vec<String> {
    fake.calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::BuildProgram { options } => Some(options),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Program loading
// ---------------------------------------------------------------------------

#[test]
fn program_loaded_from_source_root() {
    let dir = tempfile::tempdir().unwrap();
    write_program(&dir, "composite.cl", "kernel void compositeOver32() {}");
    let fake = Arc::new(FakeDriver::with_gpu(&["compositeOver32"]));

    let config = rooted_config(&dir);
    let ctx = ComputeContext::new(fake.clone(), &config);
    assert!(ctx.available());

    let root = dir.path().display().to_string();
    assert_eq!(
        build_options(&fake),
        vec![format!("-cl-mad-enable -I{root} -I{root}/include")]
    );
    assert!(ctx.kernel_by_name("compositeOver32").is_some());
}

#[test]
fn missing_program_file_leaves_context_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeDriver::with_gpu(&["compositeOver32"]));

    let ctx = ComputeContext::new(fake.clone(), &rooted_config(&dir));
    assert!(!ctx.available());
    assert_eq!(fake.count(|c| *c == Call::CreateProgram), 0);

    drop(ctx);
    assert_eq!(fake.count(|c| matches!(c, Call::ReleaseQueue(_))), 1);
    assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 1);
}

#[test]
fn custom_program_name() {
    let dir = tempfile::tempdir().unwrap();
    write_program(&dir, "blend.cl", "kernel void k() {}");
    let fake = Arc::new(FakeDriver::with_gpu(&["k"]));

    let config = ComputeConfig {
        program_name: "blend.cl".to_string(),
        ..rooted_config(&dir)
    };
    assert!(ComputeContext::new(fake, &config).available());
}

#[test]
fn config_file_drives_bring_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compute.json");
    std::fs::write(
        &path,
        r#"{ "enabled": true, "device_class": "cpu", "platform_vendor": "Beta" }"#,
    )
    .unwrap();
    let config = ComputeConfig::from_json_file(&path).unwrap();

    let fake = Arc::new(
        FakeDriver::new()
            .platform(FakePlatform::new("Alpha Corp", "Alpha").with_device(DeviceClass::Gpu, "A"))
            .platform(FakePlatform::new("Beta Inc", "Beta").with_device(DeviceClass::Cpu, "B"))
            .kernels(&["compositeOver32"]),
    );
    let ctx = ComputeContext::with_source(fake.clone(), &config, ProgramSource::Embedded);
    assert!(ctx.available());
    assert_eq!(ctx.device_name().as_deref(), Some("B"));
}

// ---------------------------------------------------------------------------
// Build failure
// ---------------------------------------------------------------------------

#[test]
fn build_failure_keeps_log() {
    let dir = tempfile::tempdir().unwrap();
    write_program(&dir, "composite.cl", "kernel void broken( {}");
    let fake = Arc::new(
        FakeDriver::with_gpu(&[])
            .build_log_text("composite.cl:1:22: error: expected ')'")
            .fail_at(FailPoint::BuildProgram, ClStatus::BUILD_PROGRAM_FAILURE),
    );

    let ctx = ComputeContext::new(fake.clone(), &rooted_config(&dir));
    assert!(!ctx.available());
    assert_eq!(ctx.program(), None);
    assert!(ctx.build_log().unwrap().contains("expected ')'"));
    assert!(ctx.kernel_by_name("compositeOver32").is_none());
    assert_eq!(fake.count(|c| matches!(c, Call::CreateKernel(_))), 0);

    drop(ctx);
    assert_eq!(fake.count(|c| matches!(c, Call::ReleaseProgram(_))), 1);
    assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 1);
}

// ---------------------------------------------------------------------------
// Full lifecycle through the service
// ---------------------------------------------------------------------------

#[test]
fn service_lifecycle() {
    let fake = Arc::new(FakeDriver::with_gpu(&["compositeAlphaDarken32", "compositeOver32"]));
    let service = ComputeService::new(fake.clone(), ComputeConfig::enabled())
        .with_source(ProgramSource::Embedded);

    let ctx = service.initialize();
    assert!(service.is_available());
    assert_eq!(ctx.kernel_names().len(), 2);

    {
        let kernel = ctx.kernel_by_name("compositeAlphaDarken32").unwrap();
        assert_eq!(kernel.name(), "compositeAlphaDarken32");
        assert_eq!(fake.live_kernels(), 1);
    }
    assert_eq!(fake.live_kernels(), 0);

    drop(ctx);
    service.shutdown();

    let releases: Vec<Call> = fake
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                Call::ReleaseProgram(_)
                    | Call::ReleaseQueue(_)
                    | Call::ReleaseContext(_)
                    | Call::ReleaseDevice(_)
            )
        })
        .collect();
    assert_eq!(releases.len(), 4);
    assert!(matches!(releases[0], Call::ReleaseProgram(_)));
    assert!(matches!(releases[3], Call::ReleaseDevice(_)));
    assert!(!service.is_available());
}

#[test]
fn environment_disabled_service_is_inert() {
    let fake = Arc::new(FakeDriver::with_gpu(&["compositeOver32"]));
    let config = ComputeConfig::from_lookup(|_| None);
    let service = ComputeService::new(fake.clone(), config);

    assert!(!service.initialize().available());
    service.shutdown();
    assert!(fake.calls().is_empty());
}
