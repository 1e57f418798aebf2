//! API gateway binary.
//!
//! ```text
//!   Client ──▶ panic guard ─▶ request id ─▶ request log ─▶ forwarded headers
//!          ─▶ CORS ─▶ compression ─▶ rate limit ─▶ authenticate ─▶ authorize
//!          ─▶ health endpoint | upstream dispatch ──▶ Backend cluster
//! ```

use clap::Parser;

use api_gateway::lifecycle::{startup, Cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    startup::run(Cli::parse()).await
}
