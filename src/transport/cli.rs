//! CLI transport for direct terminal interaction

use crate::agent::{DispatchConfig, DispatchLoop, LoopEvent, TurnOutcome, TurnReport};
use crate::config::{load_dotenv, Config, Credentials};
use crate::llm::{self, LlmProvider};
use crate::search::{self, SearchClient};
use crate::tools::{ToolRegistry, WebSearchTool};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

const EMPTY_ANSWER_TEXT: &str = "(The model returned an empty answer.)";
const NO_SEARCH_RESULTS_TEXT: &str = "No search results found or an error occurred.";

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub max_results: Option<usize>,
}

/// Load config and credentials; either failing ends the process before any client exists
fn load(options: &RunOptions) -> Result<(Config, Credentials)> {
    let mut config = Config::load(options.config_path.as_deref())?;
    if let Some(n) = options.max_results {
        config.search.max_results = n;
    }
    load_dotenv();
    let credentials = Credentials::from_env()?;
    tracing::debug!("Loaded configuration, credentials: {:?}", credentials);
    Ok((config, credentials))
}

/// Wire the search client, tool registry and model into a dispatch loop
pub fn build_dispatch(
    config: &Config,
    credentials: &Credentials,
    model: Option<&str>,
) -> Result<DispatchLoop> {
    let search = SearchClient::new(&config.search, &credentials.search)
        .context("Failed to create search client")?;

    let mut registry = ToolRegistry::new();
    registry.set_tool_timeout_secs(config.agent.tool_timeout_secs);
    registry.register(Arc::new(WebSearchTool::new(Arc::new(search))));

    let provider: Arc<dyn LlmProvider> = Arc::from(llm::create_provider(config, credentials, model)?);
    tracing::info!("Chatting with {} ({})", provider.model(), provider.name());

    Ok(DispatchLoop::new(
        provider,
        registry,
        &config.llm.system_instruction,
        DispatchConfig::from(&config.agent),
    ))
}

/// A writer shared between the chat loop and the progress handler, so both land in one stream
pub struct SharedOutput<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> SharedOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Borrow the underlying writer; a panic in another holder doesn't lose the output
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W> Clone for SharedOutput<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> Write for SharedOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// Send the loop's progress events to `out`
fn show_progress_on<W: Write + Send + 'static>(
    dispatch: &mut DispatchLoop,
    out: &SharedOutput<W>,
) {
    let out = out.clone();
    dispatch.set_event_handler(move |event| {
        if let Err(e) = write_progress(&mut *out.lock(), event) {
            tracing::debug!("Could not write progress: {}", e);
        }
    });
}

fn write_progress<W: Write>(out: &mut W, event: &LoopEvent) -> io::Result<()> {
    match event {
        LoopEvent::Thinking => writeln!(out, "{}", "🤔 Thinking...".dimmed()),
        LoopEvent::ToolRequested { name, arguments } => {
            writeln!(out, "{}", format!("🔧 Calling {} {}", name, arguments).cyan())
        }
        LoopEvent::ToolCompleted { name, success, .. } => {
            if *success {
                writeln!(out, "{}", format!("   {} finished", name).dimmed())
            } else {
                writeln!(out, "{}", format!("   {} failed", name).yellow())
            }
        }
    }
}

/// Run the interactive research chat
pub async fn run_chat(options: &RunOptions) -> Result<()> {
    let (config, credentials) = load(options)?;
    let mut dispatch = build_dispatch(&config, &credentials, options.model.as_deref())?;

    let stdin = io::stdin();
    let out = SharedOutput::new(io::stdout());
    chat_loop(&mut dispatch, stdin.lock(), out, config.agent.show_progress).await
}

/// The read-ask-print loop, over any input and output
pub async fn chat_loop<R: BufRead, W: Write + Send + 'static>(
    dispatch: &mut DispatchLoop,
    mut input: R,
    mut out: SharedOutput<W>,
    show_progress: bool,
) -> Result<()> {
    if show_progress {
        show_progress_on(dispatch, &out);
    }

    writeln!(out, "{}", "🔎 Explorer research assistant".bold())?;
    writeln!(
        out,
        "Using model {}. Ask anything; type 'exit' or 'quit' to leave, 'clear' to start over.",
        dispatch.session().model()
    )?;

    loop {
        write!(out, "\n{} ", "❓ Your question:".bold())?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // EOF ends the session like `exit`
            writeln!(out)?;
            writeln!(out, "👋 Goodbye!")?;
            break;
        }

        if line.trim().eq_ignore_ascii_case("clear") {
            dispatch.reset();
            writeln!(out, "Conversation cleared.")?;
            continue;
        }

        match dispatch.run_turn(&line).await {
            TurnOutcome::Quit => {
                writeln!(out, "👋 Goodbye!")?;
                break;
            }
            TurnOutcome::Empty => continue,
            TurnOutcome::Answer(report) => print_answer(&mut out, &report)?,
            TurnOutcome::Failed(message) => {
                writeln!(out, "{} {}", "❌ An error occurred:".red(), message)?;
            }
        }
    }

    Ok(())
}

fn print_answer<W: Write>(out: &mut W, report: &TurnReport) -> Result<()> {
    let rule = "─".repeat(50);
    writeln!(out, "\n{}", "✅ Answer".green().bold())?;
    writeln!(out, "{}", rule)?;
    if report.text.trim().is_empty() {
        writeln!(out, "{}", EMPTY_ANSWER_TEXT)?;
    } else {
        writeln!(out, "{}", report.text.trim_end())?;
    }
    writeln!(out, "{}", rule)?;
    if report.tool_calls_made > 0 {
        writeln!(
            out,
            "{}",
            format!(
                "(Used {} tool call(s), {} tokens)",
                report.tool_calls_made, report.usage.total_tokens
            )
            .dimmed()
        )?;
    }
    Ok(())
}

/// Answer a single question and exit
pub async fn run_ask(options: &RunOptions, question: &str) -> Result<()> {
    let (config, credentials) = load(options)?;
    let mut dispatch = build_dispatch(&config, &credentials, options.model.as_deref())?;

    let mut out = SharedOutput::new(io::stdout());
    if config.agent.show_progress {
        show_progress_on(&mut dispatch, &out);
    }

    match dispatch.run_turn(question).await {
        TurnOutcome::Answer(report) => print_answer(&mut out, &report),
        TurnOutcome::Failed(message) => anyhow::bail!("{}", message),
        TurnOutcome::Empty => anyhow::bail!("Question is empty"),
        TurnOutcome::Quit => Ok(()),
    }
}

/// Query the search API directly, without the model
pub async fn run_search(options: &RunOptions, query: &str, count: Option<usize>) -> Result<()> {
    let mut config = Config::load(options.config_path.as_deref())?;
    if let Some(n) = options.max_results {
        config.search.max_results = n;
    }
    load_dotenv();
    let credentials = Credentials::search_from_env()?;
    let client = SearchClient::new(&config.search, &credentials)?;

    let count = count.unwrap_or_else(|| client.default_max_results());
    let mut stdout = io::stdout();
    write_search_results(&mut stdout, client.search(query, count).await)
}

fn write_search_results<W: Write>(
    out: &mut W,
    results: Result<Vec<search::SearchResult>, search::SearchError>,
) -> Result<()> {
    match results {
        Ok(results) if !results.is_empty() => {
            write!(out, "{}", search::format_for_console(&results))?;
        }
        Ok(_) => writeln!(out, "{}", NO_SEARCH_RESULTS_TEXT)?,
        Err(e) => {
            tracing::error!("Search failed: {}", e);
            writeln!(out, "{}", NO_SEARCH_RESULTS_TEXT)?;
        }
    }
    Ok(())
}
