/*
[INPUT]:  -
[OUTPUT]: Shared test fixtures for the exchange crate's integration tests
[POS]:    Test infrastructure
[UPDATE]: When adding new test fixtures
*/

use wiremock::MockServer;

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}
