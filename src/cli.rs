use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::warn;

use crate::config::{IssuerConfig, LETS_ENCRYPT_PRODUCTION};
use crate::core::commands::{self, CommandContext, error_kind};
use crate::core::types::CommandOutcome;

/// DNS-01 certificate issuance against an ACME CA, with Cloudflare-hosted TXT records.
#[derive(Parser, Debug)]
#[command(name = "dns01-issuer", version, about)]
pub struct Cli {
    /// JSON configuration file; environment variables override it
    #[arg(long, short = 'c', env = "DNS01_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Use the Let's Encrypt production directory instead of the configured one
    #[arg(long, global = true)]
    pub production: bool,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the Cloudflare zone id hosting a domain
    ZoneId {
        #[arg(long)]
        domain: String,
    },

    /// Manage the ACME account
    Account(AccountArgs),

    /// Create an order and print the TXT values to publish
    Request {
        #[arg(long)]
        domain: String,
    },

    /// Publish or remove challenge TXT records
    Txt(TxtArgs),

    /// Show the TXT values public resolvers return for a domain's challenge record
    DnsCheck {
        #[arg(long)]
        domain: String,
    },

    /// Validate a requested session and store the issued certificate
    Authorize {
        /// Session id printed by `request`
        #[arg(long)]
        session: String,
    },

    /// Verify the Cloudflare API token
    TokenInfo,

    /// Run the whole flow: order, publish, validate, issue and clean up
    Issue {
        #[arg(long)]
        domain: String,

        /// Zone id; resolved from the domain when omitted
        #[arg(long)]
        zone_id: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub command: AccountCommand,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Generate an account key, register it and store the credentials
    Create {
        /// Replace existing credentials
        #[arg(long, short = 'f')]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct TxtArgs {
    #[command(subcommand)]
    pub command: TxtCommand,
}

#[derive(Subcommand, Debug)]
pub enum TxtCommand {
    /// Create one `_acme-challenge` record per content value
    Add {
        #[arg(long)]
        zone_id: String,

        #[arg(long)]
        domain: String,

        #[arg(long = "content", required = true, num_args = 1..)]
        contents: Vec<String>,
    },

    /// Delete records by id, stopping at the first failure
    Delete {
        #[arg(long)]
        zone_id: String,

        #[arg(long = "record-id", required = true, num_args = 1..)]
        record_ids: Vec<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ZoneId { .. } => "zone-id",
            Command::Account(_) => "account create",
            Command::Request { .. } => "request",
            Command::Txt(TxtArgs {
                command: TxtCommand::Add { .. },
            }) => "txt add",
            Command::Txt(TxtArgs {
                command: TxtCommand::Delete { .. },
            }) => "txt delete",
            Command::DnsCheck { .. } => "dns-check",
            Command::Authorize { .. } => "authorize",
            Command::TokenInfo => "token-info",
            Command::Issue { .. } => "issue",
        }
    }
}

/// Loads configuration and runs the selected command. Errors become a tagged outcome.
pub async fn run(cli: Cli) -> CommandOutcome {
    let name = cli.command.name();
    let mut config = match IssuerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return CommandOutcome::error(name, "config", err.to_string(), None),
    };
    if cli.production {
        config.directory_url = LETS_ENCRYPT_PRODUCTION.to_string();
    }

    let ctx = CommandContext::new(config);
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[issuance] interrupt received; cancelling");
            cancel.cancel();
        }
    });

    let result = match &cli.command {
        Command::ZoneId { domain } => commands::zone_id(&ctx, domain).await,
        Command::Account(AccountArgs {
            command: AccountCommand::Create { force },
        }) => commands::create_account(&ctx, *force).await,
        Command::Request { domain } => commands::request_certificate(&ctx, domain).await,
        Command::Txt(TxtArgs {
            command:
                TxtCommand::Add {
                    zone_id,
                    domain,
                    contents,
                },
        }) => commands::add_txt_records(&ctx, zone_id, domain, contents).await,
        Command::Txt(TxtArgs {
            command: TxtCommand::Delete {
                zone_id,
                record_ids,
            },
        }) => commands::delete_txt_records(&ctx, zone_id, record_ids).await,
        Command::DnsCheck { domain } => commands::dns_check(&ctx, domain).await,
        Command::Authorize { session } => commands::authorize(&ctx, session).await,
        Command::TokenInfo => commands::token_info(&ctx).await,
        Command::Issue { domain, zone_id } => {
            commands::issue(&ctx, domain, zone_id.as_deref()).await
        }
    };

    result.unwrap_or_else(|err| CommandOutcome::error(name, error_kind(&err), format!("{err:#}"), None))
}
