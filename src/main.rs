//! Document redaction CLI.
//!
//! Thin front end over the library: every subcommand loads the
//! configuration, applies command-line overrides and prints a human summary
//! on stdout. Logs go to stderr through `tracing`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use docredact::pipeline::extract::ParsedDocument;
use docredact::redaction::{pdf, positioned::build_page_text};
use docredact::{
    Config, DocumentProcessor, ExtractionMode, PdfAction, ProgressPoller, ProgressTracker,
    RedactionService, RedactionStats, RuleId, RuleRegistry, RuleSet, Sensitivity, TextStrategy,
};

/// Sensitive-data redaction tool
///
/// Detects personal data in text and PDF documents and redacts it.
#[derive(Parser)]
#[command(name = "docredact")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "DOCREDACT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect sensitive data in a text file or string
    Detect {
        /// Text file to scan
        #[arg(value_name = "FILE", required_unless_present = "text", conflicts_with = "text")]
        input: Option<PathBuf>,

        /// Inline text to scan
        #[arg(long)]
        text: Option<String>,

        /// Print matches and stats as JSON
        #[arg(long)]
        json: bool,

        /// tokenize, mask or underline
        #[arg(long)]
        strategy: Option<TextStrategy>,

        /// Comma separated rule list, or "all"
        #[arg(long)]
        rules: Option<RuleSet>,

        /// strict, normal or relaxed
        #[arg(long)]
        sensitivity: Option<Sensitivity>,
    },

    /// Redact a PDF or text document
    Redact {
        /// Input document
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output document
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Comma separated rule list, or "all"
        #[arg(long)]
        rules: Option<RuleSet>,

        /// strict, normal or relaxed
        #[arg(long)]
        sensitivity: Option<Sensitivity>,

        /// Text documents: tokenize, mask or underline
        #[arg(long)]
        strategy: Option<TextStrategy>,

        /// PDF documents: redact or highlight
        #[arg(long)]
        action: Option<PdfAction>,

        /// auto, parser or ocr
        #[arg(long)]
        mode: Option<ExtractionMode>,

        /// Stop waiting after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Extract text from a PDF (for debugging and verification)
    Extract {
        /// Input PDF file path
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output text file (optional, defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Use the plain text extractor instead of positioned runs
        #[arg(long)]
        plain: bool,
    },

    /// Validate a single value against one rule
    Validate {
        /// Rule name, e.g. CREDIT_CARD or iban
        #[arg(long)]
        rule: RuleId,

        value: String,
    },

    /// List the detection rules
    Rules,
}

/// Command handler holding the resolved configuration.
struct CommandHandler {
    config: Config,
    service: RedactionService,
    verbose: bool,
}

impl CommandHandler {
    fn new(config: Config, verbose: bool) -> Self {
        let service = RedactionService::new(config.transformer());
        Self {
            config,
            service,
            verbose,
        }
    }

    fn detect(
        &self,
        text: &str,
        json: bool,
        strategy: Option<TextStrategy>,
        rules: Option<RuleSet>,
        sensitivity: Option<Sensitivity>,
    ) -> Result<()> {
        let rules = rules.unwrap_or_else(|| self.config.rules.clone());
        let sensitivity = sensitivity.unwrap_or(self.config.sensitivity);
        let strategy = strategy.unwrap_or(self.config.strategy);

        let detection = self.service.detect_text(text, &rules, sensitivity);
        let output = self
            .service
            .transformer()
            .apply(text, &detection.matches, strategy);

        if json {
            let report = serde_json::json!({
                "matches": detection.matches,
                "stats": detection.stats,
                "output": output,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", output);
            if self.verbose {
                print_stats(&detection.stats);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn redact(
        &self,
        input: &Path,
        output: &Path,
        rules: Option<RuleSet>,
        sensitivity: Option<Sensitivity>,
        strategy: Option<TextStrategy>,
        action: Option<PdfAction>,
        mode: Option<ExtractionMode>,
        timeout: Option<u64>,
    ) -> Result<()> {
        if !input.exists() {
            anyhow::bail!("Input file does not exist: {}", input.display());
        }
        let bytes =
            std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

        let mut options = self.config.process_options();
        if let Some(rules) = rules {
            options.rules = rules;
        }
        if let Some(sensitivity) = sensitivity {
            options.sensitivity = sensitivity;
        }
        if let Some(strategy) = strategy {
            options.strategy = strategy;
        }
        if let Some(action) = action {
            options.action = action;
        }
        if let Some(mode) = mode {
            options.extraction_mode = mode;
        }
        if options.rules.is_empty() {
            anyhow::bail!("No rules enabled. Use --rules or the rules list in the config file.");
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        options.progress_id = Some(job_id.clone());
        let timeout = timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());

        let tracker = ProgressTracker::new();
        tracker.accept(&job_id);
        let processor = DocumentProcessor::from_config(&self.config, tracker.clone());

        let poller = ProgressPoller::new(Arc::new(tracker));
        let handle = poller.start(&job_id, self.config.poll_interval());
        let mut updates = handle.subscribe();
        let logger = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let latest = updates.borrow_and_update().clone();
                if let Some(record) = latest {
                    debug!(stage = %record.stage, percent = record.percent, "Progress");
                }
            }
        });

        if self.verbose {
            println!("Input:  {}", input.display());
            println!("Output: {}", output.display());
            println!("Rules:  {} enabled", options.rules.len());
        }

        let result = processor
            .process_with_timeout(bytes, options, timeout)
            .await;
        handle.cancel();
        let _ = logger.await;
        let document = result.with_context(|| "Redaction failed")?;

        std::fs::write(output, &document.bytes)
            .with_context(|| format!("Failed to write to {}", output.display()))?;

        if self.verbose {
            println!("\nRedaction Summary:");
            println!("  Pages processed: {}", document.pages_processed);
            println!("  Pages failed:    {}", document.pages_failed);
            if let Some(method) = document.extraction_method {
                println!("  Extraction:      {}", method);
            }
            print_stats(&document.stats);
        }

        if document.stats.total > 0 {
            println!(
                "✓ Successfully redacted {} instance(s) → {}",
                document.stats.total,
                output.display()
            );
        } else {
            println!("⚠ No instances found to redact");
        }
        Ok(())
    }

    fn extract(&self, input: &Path, output: Option<&Path>, plain: bool) -> Result<()> {
        if !input.exists() {
            anyhow::bail!("Input file does not exist: {}", input.display());
        }
        let bytes =
            std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

        let text = if plain {
            pdf::extract_plain_text(&bytes).with_context(|| "Text extraction failed")?
        } else {
            let parsed = ParsedDocument::parse(&bytes).with_context(|| "Text extraction failed")?;
            let mut text = String::new();
            for (index, page) in parsed.pages.into_iter().enumerate() {
                text.push_str(&format!("--- Page {} ---\n", index + 1));
                match page {
                    Ok(runs) => {
                        let (page_text, _) = build_page_text(runs);
                        text.push_str(&page_text);
                    }
                    Err(e) => text.push_str(&format!("[unreadable: {}]", e)),
                }
                text.push('\n');
            }
            text
        };

        if let Some(output_path) = output {
            std::fs::write(output_path, &text)
                .with_context(|| format!("Failed to write to {}", output_path.display()))?;
            println!(
                "✓ Extracted {} characters → {}",
                text.len(),
                output_path.display()
            );
        } else {
            println!("{}", text);
        }
        Ok(())
    }

    fn validate(&self, rule: RuleId, value: &str) -> Result<()> {
        let validation = self.service.validate(rule, value);
        println!("{}", serde_json::to_string(&validation)?);
        Ok(())
    }

    fn rules(&self) -> Result<()> {
        let registry = RuleRegistry::init()?;
        for rule in registry.iter() {
            let enabled = if self.config.rules.contains(rule.id) {
                "on"
            } else {
                "off"
            };
            println!(
                "{:<16} {:.2}  {:<3}  {}",
                rule.id.token(),
                rule.confidence,
                enabled,
                if rule.validator.is_some() {
                    "validated"
                } else {
                    "pattern only"
                }
            );
        }
        Ok(())
    }
}

fn print_stats(stats: &RedactionStats) {
    println!("  Matches: {}", stats.total);
    for (rule, count) in &stats.by_type {
        println!("    {:<16} {}", rule.token(), count);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    RuleRegistry::init().with_context(|| "Failed to compile detection rules")?;
    let config = Config::load(cli.config.as_deref()).with_context(|| "Invalid configuration")?;
    let handler = CommandHandler::new(config, cli.verbose);

    match cli.command {
        Commands::Detect {
            input,
            text,
            json,
            strategy,
            rules,
            sensitivity,
        } => {
            let text = match (text, input) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Either FILE or --text is required"),
            };
            handler.detect(&text, json, strategy, rules, sensitivity)?;
        }
        Commands::Redact {
            input,
            output,
            rules,
            sensitivity,
            strategy,
            action,
            mode,
            timeout,
        } => {
            handler
                .redact(
                    &input,
                    &output,
                    rules,
                    sensitivity,
                    strategy,
                    action,
                    mode,
                    timeout,
                )
                .await?;
        }
        Commands::Extract {
            input,
            output,
            plain,
        } => {
            handler.extract(&input, output.as_deref(), plain)?;
        }
        Commands::Validate { rule, value } => {
            handler.validate(rule, &value)?;
        }
        Commands::Rules => {
            handler.rules()?;
        }
    }

    Ok(())
}
