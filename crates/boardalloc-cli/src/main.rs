use std::io::{BufRead, Write};

mod allocator;
mod files;
mod shell;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("board management shell; 'exit' to quit");
    let stdin = std::io::stdin();
    let mut shell = shell::Shell::new();
    loop {
        print!(">> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if !shell.handle_line(&line) {
            break;
        }
    }
    Ok(())
}
