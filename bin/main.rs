use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{ArgGroup, Parser};
use empath_mailer::{OutboundMessage, TomlFile, logging, send_email_from};

/// Send a single HTML email through the configured SMTP account.
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(group(ArgGroup::new("body").required(true).args(["html", "html_file"])))]
struct Args {
    /// TOML file holding the SMTP account.
    #[arg(short, long, default_value = "mailer.toml")]
    config: PathBuf,

    /// Recipient address.
    #[arg(long)]
    to: String,

    #[arg(long, default_value = "Test email")]
    subject: String,

    /// HTML body given inline.
    #[arg(long)]
    html: Option<String>,

    /// File containing the HTML body.
    #[arg(long)]
    html_file: Option<PathBuf>,

    /// `From` header, defaults to the configured from address.
    #[arg(long)]
    from: Option<String>,

    #[arg(long)]
    reply_to: Option<String>,
}

async fn body(args: &Args) -> anyhow::Result<String> {
    if let Some(path) = &args.html_file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Unable to read {}", path.display()));
    }

    Ok(args.html.clone().unwrap_or_default())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init();

    let args = Args::parse();

    let mut message = OutboundMessage::new(&args.to, &args.subject, body(&args).await?);
    if let Some(from) = &args.from {
        message = message.from(from);
    }
    if let Some(reply_to) = &args.reply_to {
        message = message.reply_to(reply_to);
    }

    match send_email_from(&TomlFile::new(&args.config), &message).await {
        Ok(delivery) => {
            println!("test email sent: {}", delivery.server_reply);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("test failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
