use std::process::ExitCode;

use borg_integration_tests::EchoPlugin;

#[tokio::main]
async fn main() -> ExitCode {
    borg_plugin_sdk::run(vec![Box::new(EchoPlugin)]).await
}
