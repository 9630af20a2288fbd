use anyhow::Result;

use sunhome_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();
    let config = ConfigWrapper::new(options.config_file)?;

    sunhome_bridge::run(config).await
}
