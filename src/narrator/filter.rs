//! Eligibility rules applied before any text work is done.
//!
//! Letters and messages pass whenever narration is enabled. Social
//! interactions are throttled by cooldown, game speed, drama and
//! visibility gates, and their text is picked from several candidate
//! renderings of the interaction.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::sanitizer;
use crate::config::Settings;

/// Interaction definitions that count as casual chatter for `drama_only`.
const CASUAL_INTERACTIONS: [&str; 3] = ["chitchat", "deeptalk", "kindwords"];

/// Messages shorter than this after cleanup are trivial notifications.
const MIN_MESSAGE_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Letter,
    Message,
    Social,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Letter => "letter",
            Self::Message => "message",
            Self::Social => "social",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSpeed {
    Paused,
    #[default]
    Normal,
    Fast,
    Superfast,
    Ultrafast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub z: i32,
}

/// Map cells currently inside the camera view, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRect {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
}

impl ViewRect {
    pub fn contains(&self, cell: Cell) -> bool {
        (self.min_x..=self.max_x).contains(&cell.x) && (self.min_z..=self.max_z).contains(&cell.z)
    }
}

/// What the host reports about the simulation when an interaction happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default)]
    pub time_speed: TimeSpeed,
    #[serde(default)]
    pub view: Option<ViewRect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pawn {
    pub label: String,
    #[serde(default)]
    pub spawned: bool,
    #[serde(default)]
    pub position: Option<Cell>,
}

/// A social interaction log entry as handed over by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interaction {
    pub def_name: String,
    pub label: String,
    pub initiator: Option<Pawn>,
    pub recipient: Option<Pawn>,
    /// The entry rendered from the initiator's point of view.
    pub initiator_text: Option<String>,
    /// The entry rendered from the recipient's point of view.
    pub recipient_text: Option<String>,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocialContext {
    pub def_name: String,
    pub initiator: Option<Pawn>,
    pub world: WorldState,
}

#[derive(Debug, Clone)]
pub struct NarrationEvent {
    pub raw_text: String,
    pub category: Category,
    pub timestamp: Instant,
    pub social: Option<SocialContext>,
}

impl NarrationEvent {
    pub fn new(raw_text: impl Into<String>, category: Category) -> Self {
        Self {
            raw_text: raw_text.into(),
            category,
            timestamp: Instant::now(),
            social: None,
        }
    }

    pub fn letter(label: &str, body: &str) -> Self {
        Self::new(format!("{label}. {body}"), Category::Letter)
    }

    pub fn social(interaction: &Interaction, world: WorldState) -> Self {
        Self {
            raw_text: extract_interaction_text(interaction),
            category: Category::Social,
            timestamp: Instant::now(),
            social: Some(SocialContext {
                def_name: interaction.def_name.clone(),
                initiator: interaction.initiator.clone(),
                world,
            }),
        }
    }
}

/// Why an event did not make it into the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Disabled,
    SocialDisabled,
    Cooldown { remaining: Duration },
    GameTooFast(TimeSpeed),
    CasualInteraction(String),
    OffScreen,
    MissingContext,
    Invalid,
    TooShort,
    Duplicate,
    QueueFull { outstanding: usize, limit: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "narration disabled"),
            Self::SocialDisabled => write!(f, "social narration disabled"),
            Self::Cooldown { remaining } => {
                write!(f, "social cooldown ({:.1}s left)", remaining.as_secs_f32())
            }
            Self::GameTooFast(speed) => write!(f, "game speed {speed:?} above normal"),
            Self::CasualInteraction(def) => write!(f, "casual interaction {def}"),
            Self::OffScreen => write!(f, "initiator not on screen"),
            Self::MissingContext => write!(f, "no interaction context"),
            Self::Invalid => write!(f, "not speakable"),
            Self::TooShort => write!(f, "message too short"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::QueueFull { outstanding, limit } => {
                write!(f, "queue full ({outstanding}/{limit})")
            }
        }
    }
}

/// Decide whether a raw event qualifies for narration at all.
///
/// `last_social` is when the previous social event was admitted.
pub fn accept(
    event: &NarrationEvent,
    settings: &Settings,
    last_social: Option<Instant>,
) -> Result<(), Rejection> {
    if !settings.enabled {
        return Err(Rejection::Disabled);
    }
    if event.category != Category::Social {
        return Ok(());
    }
    if !settings.enable_social {
        return Err(Rejection::SocialDisabled);
    }

    if let Some(last) = last_social {
        let elapsed = event.timestamp.saturating_duration_since(last);
        let cooldown = settings.social_cooldown();
        if elapsed < cooldown {
            return Err(Rejection::Cooldown {
                remaining: cooldown - elapsed,
            });
        }
    }

    let needs_context = settings.only_1x_speed || settings.drama_only || settings.only_on_screen;
    let ctx = match &event.social {
        Some(ctx) => ctx,
        None if needs_context => return Err(Rejection::MissingContext),
        None => return Ok(()),
    };

    if settings.only_1x_speed && ctx.world.time_speed > TimeSpeed::Normal {
        return Err(Rejection::GameTooFast(ctx.world.time_speed));
    }

    if settings.drama_only {
        let def = ctx.def_name.to_lowercase();
        if CASUAL_INTERACTIONS.iter().any(|casual| def.contains(casual)) {
            return Err(Rejection::CasualInteraction(ctx.def_name.clone()));
        }
    }

    if settings.only_on_screen && !initiator_visible(ctx) {
        return Err(Rejection::OffScreen);
    }

    Ok(())
}

fn initiator_visible(ctx: &SocialContext) -> bool {
    let Some(pawn) = ctx.initiator.as_ref().filter(|p| p.spawned) else {
        return false;
    };
    match (ctx.world.view, pawn.position) {
        (Some(view), Some(cell)) => view.contains(cell),
        _ => false,
    }
}

/// Checks that need the cleaned text.
pub fn accept_sanitized(category: Category, text: &str) -> Result<(), Rejection> {
    if !sanitizer::is_valid(text) {
        return Err(Rejection::Invalid);
    }
    if category == Category::Message && text.chars().count() <= MIN_MESSAGE_CHARS {
        return Err(Rejection::TooShort);
    }
    Ok(())
}

/// Pick the best speakable rendering of an interaction.
///
/// Returns an empty string when nothing usable exists.
pub fn extract_interaction_text(interaction: &Interaction) -> String {
    let pov_texts = [
        interaction
            .initiator
            .as_ref()
            .and(interaction.initiator_text.as_deref()),
        interaction
            .recipient
            .as_ref()
            .and(interaction.recipient_text.as_deref()),
    ];
    for text in pov_texts.into_iter().flatten() {
        if sanitizer::is_valid(text) && !text.contains("->") {
            return text.to_string();
        }
    }

    if let Some(first_line) = interaction
        .tooltip
        .as_deref()
        .and_then(|tip| tip.split('\n').next())
    {
        if sanitizer::is_valid(first_line) {
            return first_line.to_string();
        }
    }

    match (&interaction.initiator, &interaction.recipient) {
        (Some(initiator), Some(recipient)) if !interaction.label.is_empty() => format!(
            "{} {} with {}.",
            initiator.label, interaction.label, recipient.label
        ),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pawn(label: &str, x: i32, z: i32) -> Pawn {
        Pawn {
            label: label.into(),
            spawned: true,
            position: Some(Cell { x, z }),
        }
    }

    fn view() -> WorldState {
        WorldState {
            time_speed: TimeSpeed::Normal,
            view: Some(ViewRect {
                min_x: 0,
                min_z: 0,
                max_x: 50,
                max_z: 50,
            }),
        }
    }

    fn insult() -> Interaction {
        Interaction {
            def_name: "Insult".into(),
            label: "insulted".into(),
            initiator: Some(pawn("Anna", 10, 10)),
            recipient: Some(pawn("Bob", 12, 10)),
            initiator_text: Some("Anna insulted Bob about his cooking.".into()),
            recipient_text: None,
            tooltip: None,
        }
    }

    #[test]
    fn disabled_rejects_everything() {
        let settings = Settings {
            enabled: false,
            ..Settings::default()
        };
        let event = NarrationEvent::new("Raid incoming", Category::Letter);
        assert_eq!(accept(&event, &settings, None), Err(Rejection::Disabled));
    }

    #[test]
    fn letters_and_messages_pass_when_enabled() {
        let settings = Settings::default();
        let letter = NarrationEvent::letter("Raid", "Pirates approach.");
        assert_eq!(letter.raw_text, "Raid. Pirates approach.");
        assert!(accept(&letter, &settings, None).is_ok());
        let message = NarrationEvent::new("Bob finished a sculpture.", Category::Message);
        assert!(accept(&message, &settings, Some(message.timestamp)).is_ok());
    }

    #[test]
    fn social_requires_enable_social() {
        let settings = Settings {
            enable_social: false,
            ..Settings::default()
        };
        let event = NarrationEvent::social(&insult(), view());
        assert_eq!(accept(&event, &settings, None), Err(Rejection::SocialDisabled));
    }

    #[test]
    fn social_cooldown_gate() {
        let settings = Settings::default();
        let event = NarrationEvent::social(&insult(), view());
        let recent = event.timestamp - Duration::from_secs(5);
        assert!(matches!(
            accept(&event, &settings, Some(recent)),
            Err(Rejection::Cooldown { .. })
        ));
        let old = event.timestamp - Duration::from_secs(20);
        assert!(accept(&event, &settings, Some(old)).is_ok());
    }

    #[test]
    fn speed_gate_only_when_configured() {
        let mut world = view();
        world.time_speed = TimeSpeed::Superfast;
        let event = NarrationEvent::social(&insult(), world);
        assert_eq!(
            accept(&event, &Settings::default(), None),
            Err(Rejection::GameTooFast(TimeSpeed::Superfast))
        );
        let relaxed = Settings {
            only_1x_speed: false,
            ..Settings::default()
        };
        assert!(accept(&event, &relaxed, None).is_ok());
    }

    #[test]
    fn drama_only_skips_casual_talk() {
        let settings = Settings {
            drama_only: true,
            ..Settings::default()
        };
        let mut chat = insult();
        chat.def_name = "Chitchat".into();
        let event = NarrationEvent::social(&chat, view());
        assert_eq!(
            accept(&event, &settings, None),
            Err(Rejection::CasualInteraction("Chitchat".into()))
        );
        let event = NarrationEvent::social(&insult(), view());
        assert!(accept(&event, &settings, None).is_ok());
    }

    #[test]
    fn on_screen_gate() {
        let settings = Settings::default();
        let mut far = insult();
        far.initiator = Some(pawn("Anna", 80, 10));
        let event = NarrationEvent::social(&far, view());
        assert_eq!(accept(&event, &settings, None), Err(Rejection::OffScreen));

        let mut despawned = insult();
        if let Some(p) = despawned.initiator.as_mut() {
            p.spawned = false;
        }
        let event = NarrationEvent::social(&despawned, view());
        assert_eq!(accept(&event, &settings, None), Err(Rejection::OffScreen));

        let event = NarrationEvent::social(&insult(), WorldState::default());
        assert_eq!(accept(&event, &settings, None), Err(Rejection::OffScreen));
    }

    #[test]
    fn bare_social_text_needs_context_only_if_gated() {
        let event = NarrationEvent::new("Anna and Bob argued.", Category::Social);
        assert_eq!(
            accept(&event, &Settings::default(), None),
            Err(Rejection::MissingContext)
        );
        let ungated = Settings {
            only_1x_speed: false,
            only_on_screen: false,
            ..Settings::default()
        };
        assert!(accept(&event, &ungated, None).is_ok());
    }

    #[test]
    fn message_needs_more_than_ten_chars() {
        assert_eq!(
            accept_sanitized(Category::Message, "Bob is ok."),
            Err(Rejection::TooShort)
        );
        assert!(accept_sanitized(Category::Message, "Bob is fine.").is_ok());
        assert!(accept_sanitized(Category::Letter, "Raid.").is_ok());
        assert_eq!(accept_sanitized(Category::Letter, "  "), Err(Rejection::Invalid));
    }

    #[test]
    fn extraction_prefers_initiator_view() {
        assert_eq!(
            extract_interaction_text(&insult()),
            "Anna insulted Bob about his cooking."
        );
    }

    #[test]
    fn extraction_falls_back_in_order() {
        let mut interaction = insult();
        interaction.initiator_text = Some("Anna -> Bob: Insult".into());
        interaction.recipient_text = Some("Bob was insulted by Anna.".into());
        assert_eq!(extract_interaction_text(&interaction), "Bob was insulted by Anna.");

        interaction.recipient_text = Some("x".into());
        interaction.tooltip = Some("Anna mocked Bob.\nOpinion -5".into());
        assert_eq!(extract_interaction_text(&interaction), "Anna mocked Bob.");

        interaction.tooltip = None;
        assert_eq!(extract_interaction_text(&interaction), "Anna insulted with Bob.");

        interaction.recipient = None;
        assert_eq!(extract_interaction_text(&interaction), "");
    }
}
