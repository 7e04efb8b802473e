//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest accepted debug verbosity
pub const MAX_DEBUG_LEVEL: u8 = 3;

/// Longest clip length, overlap or delay accepted, in seconds (30 days)
pub const MAX_LENGTH_SECS: f64 = 30.0 * 86_400.0;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Parsed but semantically unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Where the media files and the catalog live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// Media root directory; catalog file paths are relative to it
    #[serde(default = "default_media_root")]
    pub root: PathBuf,
    /// Catalog file name, relative to `root`
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_catalog() -> PathBuf {
    PathBuf::from("FILM_DB.json")
}

impl MediaConfig {
    /// Full path of the catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(&self.catalog)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: default_media_root(),
            catalog: default_catalog(),
        }
    }
}

/// External player invocation surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// Player executable name or path
    #[serde(default = "default_player")]
    pub executable: String,
    /// Flags passed on every launch (no OSD, no keys, aspect fill)
    #[serde(default = "default_fixed_args")]
    pub fixed_args: Vec<String>,
    #[serde(default = "default_layer_flag")]
    pub layer_flag: String,
    #[serde(default = "default_instance_flag")]
    pub instance_flag: String,
    #[serde(default = "default_loop_flag")]
    pub loop_flag: String,
    #[serde(default = "default_position_flag")]
    pub position_flag: String,
    /// Process names force-killed on abort
    #[serde(default = "default_process_names")]
    pub process_names: Vec<String>,
    /// Kill stray players from a previous run before the first dispatch
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

fn default_player() -> String {
    "omxplayer".to_string()
}

fn default_fixed_args() -> Vec<String> {
    ["--no-osd", "--no-keys", "--aspect-mode", "fill"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_layer_flag() -> String {
    "--layer".to_string()
}

fn default_instance_flag() -> String {
    "--dbus_name".to_string()
}

fn default_loop_flag() -> String {
    "--loop".to_string()
}

fn default_position_flag() -> String {
    "--pos".to_string()
}

fn default_process_names() -> Vec<String> {
    vec!["omxplayer".to_string(), "omxplayer.bin".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            executable: default_player(),
            fixed_args: default_fixed_args(),
            layer_flag: default_layer_flag(),
            instance_flag: default_instance_flag(),
            loop_flag: default_loop_flag(),
            position_flag: default_position_flag(),
            process_names: default_process_names(),
            sweep_on_start: true,
        }
    }
}

/// Duration probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default = "default_probe")]
    pub executable: String,
}

fn default_probe() -> String {
    "ffprobe".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: default_probe(),
        }
    }
}

/// One (layer, instance id) slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotConfig {
    pub layer: u32,
    pub instance: String,
}

impl SlotConfig {
    fn omx(layer: u32, player: u32) -> Self {
        Self {
            layer,
            instance: format!("org.mpris.MediaPlayer2.omxplayer{}", player),
        }
    }
}

/// The two alternating slots of every playback category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayersConfig {
    #[serde(default = "default_content_slots")]
    pub content: [SlotConfig; 2],
    #[serde(rename = "loop", default = "default_loop_slots")]
    pub looping: [SlotConfig; 2],
    #[serde(default = "default_transition_slots")]
    pub transition: [SlotConfig; 2],
}

fn default_content_slots() -> [SlotConfig; 2] {
    [SlotConfig::omx(1, 1), SlotConfig::omx(2, 2)]
}

fn default_loop_slots() -> [SlotConfig; 2] {
    [SlotConfig::omx(3, 3), SlotConfig::omx(4, 4)]
}

fn default_transition_slots() -> [SlotConfig; 2] {
    [SlotConfig::omx(5, 5), SlotConfig::omx(6, 6)]
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            content: default_content_slots(),
            looping: default_loop_slots(),
            transition: default_transition_slots(),
        }
    }
}

/// How the sequencer paces dispatches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Fire and forget, separated only by `dispatch_delay_secs`
    #[default]
    Detached,
    /// Wait for the end-time of each dispatch before the next tick
    Paced,
}

/// Timing knobs for dispatch and supervision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Seconds by which a clip's end-time is pulled forward so the next one overlaps it
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: f64,
    /// Recheck interval while a player is running
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time a process group gets between SIGTERM and SIGKILL
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_dispatch_delay_secs")]
    pub dispatch_delay_secs: f64,
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

fn default_overlap_secs() -> f64 {
    0.5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_dispatch_delay_secs() -> f64 {
    1.0
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            overlap_secs: default_overlap_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            dispatch_delay_secs: default_dispatch_delay_secs(),
            dispatch_mode: DispatchMode::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    /// Verbosity 0-3
    #[serde(default)]
    pub debug: u8,
    /// Log to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// One step of the recipe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeStepConfig {
    pub tag: String,
    /// Length override in seconds; 0 keeps the catalog value
    #[serde(default)]
    pub length: f64,
    /// Tag of clips played before and after the selected clip
    #[serde(default)]
    pub bracket: Option<String>,
}

impl RecipeStepConfig {
    pub fn new(tag: &str, length: f64) -> Self {
        Self {
            tag: tag.to_string(),
            length,
            bracket: None,
        }
    }
}

fn default_recipe() -> Vec<RecipeStepConfig> {
    vec![
        RecipeStepConfig::new("transition", 0.0),
        RecipeStepConfig::new("interview", 0.0),
        RecipeStepConfig::new("transition", 0.0),
        RecipeStepConfig::new("playful", 0.0),
        RecipeStepConfig::new("transition", 0.0),
        RecipeStepConfig::new("interview", 0.0),
        RecipeStepConfig::new("transition", 0.0),
        RecipeStepConfig::new("loop", 120.0),
    ]
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub layers: LayersConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_recipe")]
    pub recipe: Vec<RecipeStepConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            player: PlayerConfig::default(),
            probe: ProbeConfig::default(),
            layers: LayersConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
            recipe: default_recipe(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - KIOSK_MEDIA_ROOT -> media.root
    /// - KIOSK_PLAYER -> player.executable
    /// - KIOSK_DEBUG -> logging.debug
    /// - KIOSK_DISPATCH_DELAY -> timing.dispatch_delay_secs
    /// - KIOSK_LOG_FILE -> logging.file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("KIOSK_MEDIA_ROOT") {
            if !val.is_empty() {
                self.media.root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("KIOSK_PLAYER") {
            if !val.is_empty() {
                self.player.executable = val;
            }
        }

        if let Ok(val) = env::var("KIOSK_DEBUG") {
            if let Ok(level) = val.parse::<u8>() {
                self.logging.debug = level;
            }
        }

        if let Ok(val) = env::var("KIOSK_DISPATCH_DELAY") {
            if let Ok(delay) = val.parse::<f64>() {
                self.timing.dispatch_delay_secs = delay;
            }
        }

        if let Ok(val) = env::var("KIOSK_LOG_FILE") {
            if !val.is_empty() {
                self.logging.file = Some(PathBuf::from(val));
            }
        }
    }

    /// Reject configurations the player cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recipe.is_empty() {
            return Err(ConfigError::Invalid("recipe must contain at least one step".into()));
        }
        if let Some(i) = self.recipe.iter().position(|s| s.tag.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("recipe step {} has an empty tag", i)));
        }
        if let Some(step) = self
            .recipe
            .iter()
            .find(|s| !(s.length.is_finite() && (0.0..=MAX_LENGTH_SECS).contains(&s.length)))
        {
            return Err(ConfigError::Invalid(format!(
                "recipe step '{}' has invalid length {}",
                step.tag, step.length
            )));
        }
        let t = &self.timing;
        if !(0.0..=MAX_LENGTH_SECS).contains(&t.overlap_secs) {
            return Err(ConfigError::Invalid(format!("overlap_secs {}", t.overlap_secs)));
        }
        if !(0.0..=MAX_LENGTH_SECS).contains(&t.dispatch_delay_secs) {
            return Err(ConfigError::Invalid(format!(
                "dispatch_delay_secs {}",
                t.dispatch_delay_secs
            )));
        }
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".into()));
        }
        if self.logging.debug > MAX_DEBUG_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "debug level {} exceeds {}",
                self.logging.debug, MAX_DEBUG_LEVEL
            )));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("KIOSK_MEDIA_ROOT");
        env::remove_var("KIOSK_PLAYER");
        env::remove_var("KIOSK_DEBUG");
        env::remove_var("KIOSK_DISPATCH_DELAY");
        env::remove_var("KIOSK_LOG_FILE");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_recipe_steps_parse_in_order(
            steps in proptest::collection::vec(("[a-z]{1,12}", 0u32..600), 1..12),
        ) {
            let mut toml_str = String::new();
            for (tag, length) in &steps {
                toml_str.push_str(&format!("[[recipe]]\ntag = \"{}\"\nlength = {}.0\n\n", tag, length));
            }

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.recipe.len(), steps.len());
            for (parsed, (tag, length)) in config.recipe.iter().zip(&steps) {
                prop_assert_eq!(&parsed.tag, tag);
                prop_assert!((parsed.length - *length as f64).abs() < 1e-9);
                prop_assert_eq!(&parsed.bracket, &None);
            }
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_timing_section_parses(
            overlap in 0.0f64..5.0,
            poll in 1u64..1000,
            grace in 0u64..5000,
            delay in 0.0f64..30.0,
            paced in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[timing]
overlap_secs = {}
poll_interval_ms = {}
grace_period_ms = {}
dispatch_delay_secs = {}
dispatch_mode = "{}"
"#,
                overlap, poll, grace, delay, if paced { "paced" } else { "detached" }
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML");

            prop_assert!((config.timing.overlap_secs - overlap).abs() < 1e-9);
            prop_assert_eq!(config.timing.poll_interval_ms, poll);
            prop_assert_eq!(config.timing.grace_period_ms, grace);
            prop_assert!((config.timing.dispatch_delay_secs - delay).abs() < 1e-9);
            let expected_mode = if paced { DispatchMode::Paced } else { DispatchMode::Detached };
            prop_assert_eq!(config.timing.dispatch_mode, expected_mode);
        }

        #[test]
        fn prop_env_overrides_debug_level(
            initial in 0u8..=3,
            override_level in 0u8..=3,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[logging]\ndebug = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("KIOSK_DEBUG", override_level.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.logging.debug, override_level);
        }

        #[test]
        fn prop_env_overrides_dispatch_delay(
            override_delay in 0.0f64..60.0,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::default();
            env::set_var("KIOSK_DISPATCH_DELAY", override_delay.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert!((config.timing.dispatch_delay_secs - override_delay).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.media.catalog_path(), PathBuf::from("media/FILM_DB.json"));
        assert_eq!(config.player.executable, "omxplayer");
        assert_eq!(
            config.player.fixed_args,
            vec!["--no-osd", "--no-keys", "--aspect-mode", "fill"]
        );
        assert_eq!(config.layers.content[0].layer, 1);
        assert_eq!(config.layers.looping[1].layer, 4);
        assert_eq!(
            config.layers.transition[1].instance,
            "org.mpris.MediaPlayer2.omxplayer6"
        );
        assert_eq!(config.timing.dispatch_mode, DispatchMode::Detached);
        assert_eq!(config.recipe.len(), 8);
        assert_eq!(config.recipe[7], RecipeStepConfig::new("loop", 120.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layers_and_bracket_parse() {
        let toml_str = r#"
[layers]
loop = [{ layer = 10, instance = "a" }, { layer = 11, instance = "b" }]

[[recipe]]
tag = "interview"
bracket = "transition"
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");

        assert_eq!(config.layers.looping[0], SlotConfig { layer: 10, instance: "a".into() });
        assert_eq!(config.layers.content, default_content_slots());
        assert_eq!(config.recipe.len(), 1);
        assert_eq!(config.recipe[0].length, 0.0);
        assert_eq!(config.recipe[0].bracket.as_deref(), Some("transition"));
    }

    #[test]
    fn test_validate_rejects_empty_recipe() {
        let mut config = Config::default();
        config.recipe.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_blank_tag_and_negative_length() {
        let mut config = Config::default();
        config.recipe = vec![RecipeStepConfig::new("  ", 0.0)];
        assert!(config.validate().is_err());

        config.recipe = vec![RecipeStepConfig::new("loop", -1.0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_lengths_beyond_limit() {
        let mut config = Config::default();
        config.recipe = vec![RecipeStepConfig::new("loop", 1e20)];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.recipe = vec![RecipeStepConfig::new("loop", MAX_LENGTH_SECS)];
        assert!(config.validate().is_ok());

        config.timing.dispatch_delay_secs = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_debug_above_three() {
        let mut config = Config::default();
        config.logging.debug = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::parse_toml("[timing\noverlap_secs = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
