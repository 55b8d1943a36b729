//! `meshctl logs`: view or follow a supervised process log.

use mesh_core::error::Result;

use crate::config::ControllerConfig;
use crate::logfile::{self, ViewOptions};
use crate::sanitize::sanitize_name;

pub async fn run(
    config: ControllerConfig,
    name: String,
    follow: bool,
    previous: usize,
    tail: Option<usize>,
    since: Option<String>,
) -> Result<()> {
    let options = ViewOptions {
        previous,
        tail,
        since: since.as_deref().map(logfile::parse_since).transpose()?,
    };
    let name = sanitize_name(&name);
    let dir = config.logs_dir();

    if follow {
        logfile::follow(&dir, &name, &options).await
    } else {
        for line in logfile::view(&dir, &name, &options).await? {
            println!("{}", line);
        }
        Ok(())
    }
}
