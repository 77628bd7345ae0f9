/// Turns on `log` output for a test run when `RUST_LOG` is set, mirroring
/// the `tests/util/mod.rs::init()` helper shared across mio's integration
/// tests.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
