use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "shadowdash")]
#[command(about = "Watch and switch shadow-synced devices from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// CLI profile name
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign in and out of Firebase
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Read and change device shadows
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PowerArg {
    On,
    Off,
}

impl PowerArg {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LocaleArg {
    En,
    #[value(name = "pt-br")]
    PtBr,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Firebase Web API key
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        /// Firebase project id
        #[arg(long, value_name = "ID")]
        project_id: Option<String>,
        /// Device to show (repeatable; replaces the current list)
        #[arg(long = "device", value_name = "ID")]
        devices: Vec<String>,
        /// Language of notices and auth errors
        #[arg(long, value_enum)]
        locale: Option<LocaleArg>,
        /// Firestore REST endpoint override (e.g. the emulator)
        #[arg(long, value_name = "URL")]
        firestore_url: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the effective profile config
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email/password and store the session in the keychain
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Create an account and sign in
    Signup {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign in with a Google id token
    Google {
        #[arg(long, value_name = "TOKEN")]
        id_token: String,
    },
    /// Show auth status for profile
    Status,
    /// Sign out and clear the stored session
    Logout,
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Show the current card of every configured device
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the desired power of a device
    Set {
        id: String,
        #[arg(value_enum)]
        power: PowerArg,
    },
    /// Flip the desired power of a device
    Toggle { id: String },
    /// Read the reported state once
    Refresh { id: String },
    /// Follow devices in realtime until interrupted
    Watch {
        /// Devices to show (all configured devices when omitted)
        ids: Vec<String>,
        /// Output events as JSON lines
        #[arg(long)]
        json: bool,
    },
}
