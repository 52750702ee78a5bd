//! Line protocol for driving a campaign without a UI.
//!
//! - Lines starting with `>` are spoken by the active player
//! - Lines starting with `#` are commands
//! - All other output is the campaign log or engine state

use campaign_core::{
    CampaignEngine, CampaignId, CharacterSheet, ClaudeGenerator, EngineConfig, EngineError,
    InMemoryRepository, PlayerId, Repository, RepositorySnapshot,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    New(String),
    Player(CharacterSheet),
    Ready,
    Generate(String),
    /// Select the active player by name.
    As(String),
    Say(String),
    Refresh,
    Status,
    Log(usize),
    Entities,
    Acts,
    Save(PathBuf),
    Load(PathBuf),
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix('>') {
        let text = text.trim();
        if text.is_empty() {
            return Err("Usage: > <what your character says>".into());
        }
        return Ok(Some(Command::Say(text.to_string())));
    }
    let Some(command) = line.strip_prefix('#') else {
        return Err("Lines must start with '>' or '#'. Type #help for help.".into());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let required = |usage: &str| {
        if rest.is_empty() {
            Err(format!("Usage: {usage}"))
        } else {
            Ok(rest.to_string())
        }
    };

    let command = match name {
        "new" => Command::New(required("#new <campaign name>")?),
        "player" => Command::Player(parse_sheet(rest)?),
        "ready" => Command::Ready,
        "generate" => Command::Generate(required("#generate <premise>")?),
        "as" => Command::As(required("#as <player name>")?),
        "say" => Command::Say(required("#say <text>")?),
        "refresh" => Command::Refresh,
        "status" => Command::Status,
        "log" => Command::Log(if rest.is_empty() {
            20
        } else {
            rest.parse().map_err(|_| "Usage: #log [count]".to_string())?
        }),
        "entities" => Command::Entities,
        "acts" => Command::Acts,
        "save" => Command::Save(PathBuf::from(required("#save <path>")?)),
        "load" => Command::Load(PathBuf::from(required("#load <path>")?)),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '#{other}'. Type #help for help.")),
    };
    Ok(Some(command))
}

/// A sheet as JSON, or as `<name> <class> <race> <background>`.
fn parse_sheet(rest: &str) -> Result<CharacterSheet, String> {
    if rest.starts_with('{') {
        return serde_json::from_str(rest).map_err(|e| format!("Invalid character sheet: {e}"));
    }
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [name, class, race, background] => Ok(CharacterSheet::new(*name, *class, *race, *background)),
        _ => Err("Usage: #player <name> <class> <race> <background> | #player <json>".into()),
    }
}

pub fn print_commands() {
    println!("Commands:");
    println!("  #new <name>              - Create a campaign");
    println!("  #player <n> <c> <r> <b>  - Add a player (or #player <json sheet>)");
    println!("  #ready                   - Finish adding players");
    println!("  #generate <premise>      - Generate the campaign");
    println!("  #as <player>             - Choose who speaks");
    println!("  > <text>                 - Speak as the active player");
    println!("  #refresh                 - Register locations from the log");
    println!("  #status                  - Show campaign status");
    println!("  #log [n]                 - Show the last n messages");
    println!("  #entities                - List known entities");
    println!("  #acts                    - List acts");
    println!("  #save <path>             - Save everything to a JSON snapshot");
    println!("  #load <path>             - Load a JSON snapshot");
    println!("  #quit                    - Exit");
}

/// Engine plus the driver's notion of "current" campaign and speaker.
struct Session {
    config: EngineConfig,
    repository: Arc<InMemoryRepository>,
    engine: CampaignEngine,
    campaign: Option<CampaignId>,
    player: Option<PlayerId>,
}

impl Session {
    fn new(config: EngineConfig, repository: InMemoryRepository) -> Result<Self, Box<dyn std::error::Error>> {
        let generator = ClaudeGenerator::from_env(config.generation.clone())?;
        let repository = Arc::new(repository);
        let engine = CampaignEngine::new(repository.clone(), Arc::new(generator), config.clone());
        Ok(Self {
            config,
            repository,
            engine,
            campaign: None,
            player: None,
        })
    }

    fn campaign(&self) -> Result<CampaignId, EngineError> {
        self.campaign.ok_or_else(|| EngineError::NotFound {
            kind: "campaign",
            id: "(none selected, use #new or #load)".into(),
        })
    }

    async fn load(&mut self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = RepositorySnapshot::load_json(path).await?;
        let campaign = snapshot.campaigns.first().map(|c| c.id);
        let mut session = Session::new(self.config.clone(), InMemoryRepository::from_snapshot(snapshot))?;
        session.campaign = campaign;
        if let Some(id) = campaign {
            session.player = session.repository.list_players(id).await?.first().map(|p| p.id);
        }
        *self = session;
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Command::New(name) => {
                let campaign = self.engine.create_campaign(&name).await?;
                println!("[CREATED] {} ({})", campaign.name, campaign.id);
                self.campaign = Some(campaign.id);
                self.player = None;
            }
            Command::Player(sheet) => {
                let player = self.engine.add_player(self.campaign()?, sheet).await?;
                println!("[PLAYER] {}", player.describe());
                self.player.get_or_insert(player.id);
            }
            Command::Ready => {
                let campaign = self.engine.mark_players_added(self.campaign()?).await?;
                println!("[STATUS] {}", campaign.status);
            }
            Command::Generate(premise) => {
                let id = self.campaign()?;
                println!("[GENERATING] this makes many calls and can take a few minutes");
                let campaign = self.engine.generate_campaign(id, &premise).await?;
                println!("[STATUS] {}", campaign.status);
                self.print_log(id, 20).await?;
            }
            Command::As(name) => {
                let players = self.repository.list_players(self.campaign()?).await?;
                match players.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim())) {
                    Some(player) => {
                        self.player = Some(player.id);
                        println!("[ACTIVE] {}", player.name);
                    }
                    None => println!("[ERROR] No player named '{name}'"),
                }
            }
            Command::Say(text) => {
                let id = self.campaign()?;
                let player = self.player.ok_or_else(|| EngineError::NotFound {
                    kind: "player",
                    id: "(none active, use #player or #as)".into(),
                })?;
                let outcome = self.engine.submit_player_message(id, player, &text).await?;
                println!("[{}]", outcome.intent.name());
                if outcome.judged_unreasonable {
                    println!(
                        "[UNANSWERED] {}",
                        outcome.justification.as_deref().unwrap_or("not something you could know right now")
                    );
                }
                if let Some(response) = outcome.response {
                    println!("[{}]", response.speaker);
                    for para in response.text.split("\n\n") {
                        println!("{para}");
                    }
                    println!();
                }
                if !outcome.unresolved.is_empty() {
                    println!("[UNRESOLVED] {}", outcome.unresolved.join(", "));
                }
            }
            Command::Refresh => {
                let report = self.engine.refresh_locations(self.campaign()?).await?;
                println!(
                    "[LOCATIONS] updated {}, created {}, skipped {}",
                    report.updated, report.created, report.skipped
                );
            }
            Command::Status => self.print_status().await?,
            Command::Log(count) => self.print_log(self.campaign()?, count).await?,
            Command::Entities => {
                for entity in self.repository.list_entities(self.campaign()?, None).await? {
                    println!(
                        "  {} [{}]{}",
                        entity.name,
                        entity.entity_type,
                        if entity.known_to_player { "" } else { " (unknown to players)" }
                    );
                }
            }
            Command::Acts => {
                for act in self.repository.list_acts(self.campaign()?).await? {
                    println!("  Act {}: {}", act.number, act.name);
                    println!("{}", act.render_encounters());
                }
            }
            Command::Save(path) => {
                self.repository.snapshot().await.save_json(&path).await?;
                println!("[SAVED] {}", path.display());
            }
            Command::Load(path) => {
                self.load(&path).await?;
                println!("[LOADED] {}", path.display());
                self.print_status().await?;
            }
            Command::Help => print_commands(),
            Command::Quit => {}
        }
        Ok(())
    }

    async fn print_status(&self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(id) = self.campaign else {
            println!("[STATUS] no campaign selected");
            return Ok(());
        };
        let campaign = self.repository.get_campaign(id).await?;
        let players = self.repository.list_players(id).await?;
        println!("[STATUS]");
        println!("  Campaign: {} ({})", campaign.name, campaign.id);
        println!("  Status: {}", campaign.status);
        if let Some(act) = campaign.current_act {
            println!("  Act: {act}");
        }
        if let Some(location) = campaign.current_location_id {
            let location = self.repository.get_entity(location).await?;
            println!("  Location: {}", location.name);
        }
        for player in &players {
            let marker = if Some(player.id) == self.player { "*" } else { " " };
            println!(" {marker} {}", player.describe());
        }
        println!("  Messages: {}", self.repository.count_messages(id).await?);
        Ok(())
    }

    async fn print_log(&self, id: CampaignId, count: usize) -> Result<(), Box<dyn std::error::Error>> {
        for message in self.repository.recent_messages(id, count).await? {
            println!("[{}] {}", message.speaker, message.text);
        }
        Ok(())
    }
}

/// Run the driver until `#quit` or end of input.
pub async fn run_headless(
    config: EngineConfig,
    load: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(config, InMemoryRepository::new())?;
    if let Some(path) = load {
        session.load(&path).await?;
        info!(path = %path.display(), "snapshot loaded");
    }

    println!("=== Campaign Headless Mode ===");
    print_commands();
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("[ERROR] {message}");
                continue;
            }
        };
        if command == Command::Quit {
            println!("Goodbye!");
            break;
        }

        if let Err(e) = session.execute(command).await {
            error!(error = %e, "command failed");
            println!("[ERROR] {e}");
        }
        stdout.flush().ok();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("#ready").unwrap(), Some(Command::Ready));
        assert_eq!(
            parse_line("#new  Eclipse Heist ").unwrap(),
            Some(Command::New("Eclipse Heist".into()))
        );
        assert_eq!(
            parse_line("> What do I see?").unwrap(),
            Some(Command::Say("What do I see?".into()))
        );
        assert_eq!(parse_line("#log").unwrap(), Some(Command::Log(20)));
        assert_eq!(parse_line("#log 5").unwrap(), Some(Command::Log(5)));
        assert_eq!(parse_line("#exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("hello").is_err());
        assert!(parse_line("#generate").is_err());
        assert!(parse_line("#log many").is_err());
        assert!(parse_line("#dance").is_err());
        assert!(parse_line(">").is_err());
    }

    #[test]
    fn test_parse_player() {
        let Some(Command::Player(sheet)) = parse_line("#player Mira Rogue Elf Urchin").unwrap() else {
            panic!("expected a player command");
        };
        assert_eq!(sheet.name, "Mira");
        assert_eq!(sheet.class_name, "Rogue");

        let json = r#"#player {"name": "Thorn", "class": "Fighter", "race": "Dwarf", "background": "Soldier", "hp": 12, "max_hp": 12}"#;
        let Some(Command::Player(sheet)) = parse_line(json).unwrap() else {
            panic!("expected a player command");
        };
        assert_eq!(sheet.name, "Thorn");
        assert_eq!(sheet.level, 1);

        assert!(parse_line("#player Mira Rogue").is_err());
    }
}
