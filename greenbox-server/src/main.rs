use std::sync::Arc;

use greenbox_server::configs::Settings;
use greenbox_server::run;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::new()?);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = settings.logger.level.as_str();

            format!("greenbox_server={level},greenbox_control={level}").into()
        }))
        .init();

    run(&settings).await?;

    Ok(())
}
