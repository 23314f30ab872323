use std::process::ExitCode;

use borg_integration_tests::CrashingPlugin;

#[tokio::main]
async fn main() -> ExitCode {
    borg_plugin_sdk::run(vec![Box::new(CrashingPlugin)]).await
}
