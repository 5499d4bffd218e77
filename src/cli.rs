//! CLI argument parsing for the adops-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "adops-worker", about = "Ad-ops publisher onboarding worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Write the bulk upload CSV template
    Template {
        /// Output file, stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a bulk upload from a CSV file and print the result as JSON
    Upload {
        /// CSV file to upload
        file: PathBuf,
        /// User recorded as the uploader
        #[arg(long)]
        user_id: Uuid,
        /// Partner that owns the created publishers
        #[arg(long)]
        partner_id: Option<Uuid>,
        /// Parent account used when a row names none
        #[arg(long)]
        default_parent_id: Option<Uuid>,
    },
    /// Queue the historical data fetch for existing publishers
    Enqueue {
        /// Publisher IDs
        #[arg(required = true)]
        publisher_ids: Vec<Uuid>,
    },
    /// Issue a JWT for calling the NATS subjects (scripts, service accounts)
    Token {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        email: String,
        /// super_admin, admin, partner or viewer
        #[arg(long)]
        role: String,
        #[arg(long)]
        partner_id: Option<Uuid>,
    },
    /// Print data fetch queue counts
    QueueStatus,
    /// Process the data fetch queue
    ProcessQueue {
        /// Process a single item and exit
        #[arg(long)]
        once: bool,
    },
}
