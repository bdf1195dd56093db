use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tandem_core::{
    Context, EvaluatorOptimizer, Termination, ToolRegistry, config, providers, tools,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "tandem - tool-calling chat and self-refining generation", long_about = None)]
struct Cli {
    /// Log model round trips and tool calls to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Chat with the model, one-shot with -m or interactively
    Chat {
        #[arg(short, long)]
        message: Option<String>,
        /// Media to attach: a URI, a data: URL or raw base64
        #[arg(long)]
        media: Vec<String>,
        /// Do not offer tools to the model
        #[arg(long)]
        no_tools: bool,
        /// Print the reply as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Generate, score and revise a response until it passes
    Refine {
        input: String,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_context(config: &config::Config, with_tools: bool) -> Result<Context> {
    let provider = providers::create_provider(config)?;

    let registry = Arc::new(ToolRegistry::new());
    if with_tools {
        let workspace = std::env::current_dir()?;
        registry.register(Arc::new(tools::ShellTool::new(&workspace)))?;
        registry.register(Arc::new(tools::RespondTool))?;
    }

    tracing::debug!(provider = provider.name(), tools = ?registry.names(), "context ready");
    let mut context = Context::new(provider)
        .with_registry(registry)
        .with_max_tool_turns(config.max_tool_turns);
    if let Some(prompt) = &config.system_prompt {
        context = context.with_system_prompt(prompt.clone());
    }
    Ok(context)
}

async fn run_turn(
    context: &mut Context,
    message: &str,
    media: &[&str],
    with_tools: bool,
    stream: bool,
) -> Result<()> {
    if stream {
        let mut chunks = std::pin::pin!(context.stream_chat(message, media));
        let mut stdout = std::io::stdout();
        while let Some(chunk) = chunks.next().await {
            write!(stdout, "{}", chunk?)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
        return Ok(());
    }

    let response = if with_tools {
        context.chat_with_tools(message, media).await?
    } else {
        context.chat(message, media).await?
    };
    println!("{}", response.text_or_empty());
    Ok(())
}

async fn repl(context: &mut Context, with_tools: bool, stream: bool) {
    use std::io::{self, BufRead};

    println!("tandem");
    println!("Type your message (Ctrl+D to exit):\n");
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        let read = stdin.lock().read_line(&mut input);
        match read {
            Ok(0) | Err(_) => {
                println!("\nGoodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = run_turn(context, input, &[], with_tools, stream).await {
                    eprintln!("❌ Error: {}", e);
                }
                println!();
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Init
        } else {
            Commands::Chat {
                message: None,
                media: vec![],
                no_tools: false,
                stream: false,
            }
        }
    });

    match command {
        Commands::Init => {
            if config::config_exists() {
                println!(
                    "Config already exists at {}",
                    config::get_config_path().display()
                );
            } else {
                config::save_config(&config::Config::default())?;
                println!(
                    "✅ Wrote default config to {}",
                    config::get_config_path().display()
                );
            }
        }
        Commands::Chat {
            message,
            media,
            no_tools,
            stream,
        } => {
            let config = config::Config::load_or_default()?;
            let with_tools = !no_tools;
            // Streaming replies carry no tool calls, so the config default
            // only applies when tools are off.
            let stream = stream || (no_tools && config.stream.enabled);
            let mut context = build_context(&config, with_tools)?;

            match message {
                Some(msg) => {
                    let media: Vec<&str> = media.iter().map(String::as_str).collect();
                    if let Err(e) = run_turn(&mut context, &msg, &media, with_tools, stream).await {
                        eprintln!("❌ Error: {}", e);
                        anyhow::bail!("Chat failed: {}", e);
                    }
                }
                None => {
                    if !media.is_empty() {
                        anyhow::bail!("--media needs a one-shot message (-m)");
                    }
                    repl(&mut context, with_tools, stream).await;
                }
            }
        }
        Commands::Refine {
            input,
            max_iterations,
            threshold,
            criteria,
        } => {
            let config = config::Config::load_or_default()?;
            let mut refine = config.refine.clone();
            if let Some(max) = max_iterations {
                refine = refine.with_max_iterations(max);
            }
            if let Some(threshold) = threshold {
                refine = refine.with_threshold(threshold);
            }
            if !criteria.is_empty() {
                refine = refine.with_criteria(criteria);
            }

            let context = build_context(&config, false)?;
            let refiner = EvaluatorOptimizer::from_context(&context, refine)?;
            let result = refiner.run(&input).await?;

            println!("{}", result.final_output);
            eprintln!();
            for attempt in &result.history {
                eprintln!(
                    "iteration {}: score {:.2}{}",
                    attempt.iteration,
                    attempt.evaluation.score,
                    if attempt.evaluation.degraded {
                        " (unparseable evaluation)"
                    } else {
                        ""
                    }
                );
            }
            match result.termination {
                Termination::Accepted => eprintln!(
                    "✅ accepted after {} iteration(s), score {:.2}",
                    result.iterations, result.final_score
                ),
                Termination::Exhausted => eprintln!(
                    "⚠️ no candidate passed; best score {:.2} after {} iteration(s)",
                    result.final_score, result.iterations
                ),
            }
        }
    }

    Ok(())
}
