#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

mod app {
    pub mod run;
}
mod cli {
    pub mod app_config;
}

use crate::app::run::main_with_error;

#[tokio::main]
async fn main() {
    if let Err(e) = main_with_error().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
