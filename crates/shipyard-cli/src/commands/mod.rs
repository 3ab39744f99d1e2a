//! CLI command implementations.

pub mod client;
pub mod run;
pub mod runs;

use anyhow::Result;
use shipyard_config::load_stack;

pub fn validate(path: &str) -> Result<()> {
    match load_stack(path) {
        Ok(stack) => {
            let pipeline = &stack.pipeline;
            println!("Configuration is valid");
            println!("  pipeline: {}", pipeline.name);
            println!(
                "  source:   {} ({})",
                pipeline.source.repository, pipeline.source.branch
            );
            println!("  image:    {}", pipeline.registry.repository);
            println!("  deploy:   {}", pipeline.deploy.target());
            for phase in &pipeline.build.phases {
                println!("  phase {}: {} command(s)", phase.name, phase.commands.len());
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
