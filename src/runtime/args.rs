use std::path::PathBuf;

pub const USAGE: &str = "\
usage: bulk_sender <command> [args]

commands:
  distribute <recipients.csv>                      send every transfer in batches
  snapshot <recipients.csv> <out.csv>              capture current recipient balances
  reconcile <start.csv> <end.csv> <recipients.csv> compare snapshots against expected transfers
  limit                                            print the contract's recipient limit

configuration is read from the environment (RPC_URL, PRIVATE_KEY, TOKEN_ADDRESS,
BULK_SENDER_ADDRESS, BATCH_SIZE, ...)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Distribute {
        recipients: PathBuf,
    },
    Snapshot {
        recipients: PathBuf,
        output: PathBuf,
    },
    /// `start` has no header row, `end` has one.
    Reconcile {
        start: PathBuf,
        end: PathBuf,
        recipients: PathBuf,
    },
    RecipientLimit,
    Help,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distribute { .. } => "distribute",
            Self::Snapshot { .. } => "snapshot",
            Self::Reconcile { .. } => "reconcile",
            Self::RecipientLimit => "limit",
            Self::Help => "help",
        }
    }
}

fn parse_command_from_iter<I, S>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let supplied = args
        .into_iter()
        .map(|arg| arg.as_ref().trim().to_string())
        .collect::<Vec<_>>();
    let Some((name, rest)) = supplied.split_first() else {
        return Ok(Command::Help);
    };

    let take_paths = |count: usize, shape: &str| -> anyhow::Result<Vec<PathBuf>> {
        if rest.len() != count {
            return Err(anyhow::anyhow!(
                "`{name}` expects {shape}, got {} argument(s)",
                rest.len()
            ));
        }
        Ok(rest.iter().map(PathBuf::from).collect())
    };

    match name.to_ascii_lowercase().as_str() {
        "distribute" => {
            let mut paths = take_paths(1, "<recipients.csv>")?;
            Ok(Command::Distribute {
                recipients: paths.remove(0),
            })
        }
        "snapshot" => {
            let mut paths = take_paths(2, "<recipients.csv> <out.csv>")?.into_iter();
            match (paths.next(), paths.next()) {
                (Some(recipients), Some(output)) => Ok(Command::Snapshot { recipients, output }),
                _ => Err(anyhow::anyhow!("`snapshot` expects <recipients.csv> <out.csv>")),
            }
        }
        "reconcile" => {
            let mut paths = take_paths(3, "<start.csv> <end.csv> <recipients.csv>")?.into_iter();
            match (paths.next(), paths.next(), paths.next()) {
                (Some(start), Some(end), Some(recipients)) => Ok(Command::Reconcile {
                    start,
                    end,
                    recipients,
                }),
                _ => Err(anyhow::anyhow!(
                    "`reconcile` expects <start.csv> <end.csv> <recipients.csv>"
                )),
            }
        }
        "limit" => {
            take_paths(0, "no arguments")?;
            Ok(Command::RecipientLimit)
        }
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => Err(anyhow::anyhow!("unknown command `{other}`\n\n{USAGE}")),
    }
}

pub fn parse_command() -> anyhow::Result<Command> {
    parse_command_from_iter(std::env::args().skip(1))
}
