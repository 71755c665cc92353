//! # Brainstem Viz Application Entry Point
//!
//! Parses the command line and hands over to [`brainstem_viz::app::run`].
//!
//! ```text
//! brainstem-viz clusters.csv --mesh brainstem.ron --figure fig1.set
//! ```

use brainstem_viz::app::{run, AppArgs};
use clap::Parser;

fn main() {
    let args = AppArgs::parse();
    if let Err(e) = run(args) {
        log::error!("{}", e);
        eprintln!("brainstem-viz: {}", e);
        std::process::exit(1);
    }
}
