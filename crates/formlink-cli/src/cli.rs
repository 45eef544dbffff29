use clap::{Parser, Subcommand, ValueEnum};
use formlink::{MatchPolicy, ProcessTarget, Scope, SourcePreference};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formlink")]
#[command(about = "Desktop form automation through an embedded introspection bridge")]
#[command(
    long_about = "formlink locates the HTTP bridge hosted inside a desktop application, resolves controls against it (falling back to the accessibility tree), reports native dialogs that block the form and runs batches of input steps."
)]
pub struct Cli {
    /// Target process: a PID, an executable name, or `any`
    #[clap(long, short = 't', global = true, default_value = "any", env = "FORMLINK_TARGET")]
    pub target: ProcessTarget,

    /// JSON or YAML configuration file; `FORMLINK_*` variables override it
    #[clap(long, short = 'c', global = true, env = "FORMLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Probe only this port instead of scanning the socket table
    #[clap(long, short = 'p', global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find the bridge endpoint of the target and print it
    Discover,
    /// List the interactive controls of the active form
    Controls(ControlsArgs),
    /// Resolve a selector such as `id:btnSave` or `text:OK && type:Button`
    Resolve(ResolveArgs),
    /// Report native dialogs owned by the target
    Dialog(DialogArgs),
    /// Run a JSON or YAML batch of steps
    Batch(BatchArgs),
}

#[derive(Parser, Debug)]
pub struct ControlsArgs {
    /// Include labels, containers and hidden controls
    #[clap(long, short = 'a')]
    pub all: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
#[clap(rename_all = "lower")]
pub enum SourceArg {
    #[default]
    Auto,
    Bridge,
    Accessibility,
}

impl From<SourceArg> for SourcePreference {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Auto => SourcePreference::BridgeFirst,
            SourceArg::Bridge => SourcePreference::BridgeOnly,
            SourceArg::Accessibility => SourcePreference::AccessibilityOnly,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Selector string
    pub selector: String,

    /// Search every form instead of the active one
    #[clap(long, short = 'g')]
    pub global: bool,

    /// Source to consult
    #[clap(long, short = 's', value_enum)]
    pub source: Option<SourceArg>,

    /// `unique`, `first` or `nth:N`; prints a single element when set
    #[clap(long = "match", short = 'm')]
    pub match_policy: Option<MatchPolicy>,
}

impl ResolveArgs {
    pub fn scope(&self) -> Option<Scope> {
        self.global.then_some(Scope::Global)
    }
}

#[derive(Parser, Debug)]
pub struct DialogArgs {
    /// List every dialog instead of the first blocking one
    #[clap(long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// Steps file (`.json`, `.yaml` or `.yml`); `-` reads stdin
    pub file: PathBuf,

    /// Default scope for steps that do not set one
    #[clap(long, short = 'g')]
    pub global: bool,
}
