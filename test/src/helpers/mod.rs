
pub use fake_stub::{DispatchLog, FakeStub, FakeStubControl, FakeStubFactory, FakeStubs, UNKNOWN_COMMAND};
pub use test_client::TestClient;
pub use test_server::TestServer;

/// Installs a test logger once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
