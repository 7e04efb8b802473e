//! Player command construction
//!
//! Builds the external player invocation for one resolved playlist entry.

use crate::catalog::Category;
use crate::config::PlayerConfig;
use crate::layers::LayerSlot;
use std::path::PathBuf;
use std::process::Command;

/// Everything the player needs to know about one launch
#[derive(Debug, Clone)]
pub struct PlayerInvocation {
    pub category: Category,
    pub slot: LayerSlot,
    /// Start position in seconds; ignored for loops
    pub start: f64,
    pub path: PathBuf,
}

/// Formats a start offset for the position flag as plain seconds.
///
/// Keeps millisecond precision and drops trailing zeros (`4.9`, `61`).
pub fn format_position(secs: f64) -> String {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let text = format!("{:.3}", secs);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Build the player command for an invocation
///
/// Creates a Command configured with:
/// - The fixed flags (no OSD, no keyboard, aspect fill)
/// - The loop flag for loops, the start position otherwise
/// - Layer index and instance id from the acquired slot
/// - The media file path last
pub fn build_player_command(cfg: &PlayerConfig, inv: &PlayerInvocation) -> Command {
    let mut cmd = Command::new(&cfg.executable);

    cmd.args(&cfg.fixed_args);

    match inv.category {
        Category::Loop => {
            cmd.arg(&cfg.loop_flag);
        }
        Category::Content | Category::Transition => {
            cmd.arg(&cfg.position_flag).arg(format_position(inv.start));
        }
    }

    cmd.arg(&cfg.layer_flag).arg(inv.slot.layer.to_string());
    cmd.arg(&cfg.instance_flag).arg(&inv.slot.instance);

    cmd.arg(&inv.path);

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn invocation(category: Category, start: f64) -> PlayerInvocation {
        PlayerInvocation {
            category,
            slot: LayerSlot {
                layer: 2,
                instance: "org.mpris.MediaPlayer2.omxplayer2".to_string(),
            },
            start,
            path: PathBuf::from("/media/interview one.mp4"),
        }
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "0");
        assert_eq!(format_position(4.9), "4.9");
        assert_eq!(format_position(61.25), "61.25");
        assert_eq!(format_position(3725.0), "3725");
        assert_eq!(format_position(-3.0), "0");
        assert_eq!(format_position(f64::NAN), "0");
    }

    #[test]
    fn test_loop_command_has_loop_flag_and_no_position() {
        let cmd = build_player_command(&PlayerConfig::default(), &invocation(Category::Loop, 5.0));
        let args = get_command_args(&cmd);

        assert!(has_flag(&args, "--loop"));
        assert!(!has_flag(&args, "--pos"));
    }

    #[test]
    fn test_fractional_start_is_passed_through() {
        let cmd = build_player_command(&PlayerConfig::default(), &invocation(Category::Transition, 4.9));
        let args = get_command_args(&cmd);
        assert!(has_flag_with_value(&args, "--pos", "4.9"), "args: {:?}", args);
    }

    #[test]
    fn test_path_is_last_argument_unquoted() {
        let cmd = build_player_command(&PlayerConfig::default(), &invocation(Category::Content, 0.0));
        let args = get_command_args(&cmd);
        assert_eq!(args.last().map(String::as_str), Some("/media/interview one.mp4"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_player_command_completeness(
            layer in 0u32..64,
            player in 1u32..16,
            start in 0.0f64..10_000.0,
            transition in proptest::bool::ANY,
        ) {
            let category = if transition { Category::Transition } else { Category::Content };
            let instance = format!("org.mpris.MediaPlayer2.omxplayer{}", player);
            let inv = PlayerInvocation {
                category,
                slot: LayerSlot { layer, instance: instance.clone() },
                start,
                path: PathBuf::from("/media/clip.mp4"),
            };

            let cmd = build_player_command(&PlayerConfig::default(), &inv);
            let args = get_command_args(&cmd);

            prop_assert_eq!(cmd.get_program(), OsStr::new("omxplayer"));
            prop_assert!(has_flag(&args, "--no-osd"), "args: {:?}", args);
            prop_assert!(has_flag(&args, "--no-keys"), "args: {:?}", args);
            prop_assert!(has_flag_with_value(&args, "--aspect-mode", "fill"), "args: {:?}", args);
            prop_assert!(has_flag_with_value(&args, "--layer", &layer.to_string()), "args: {:?}", args);
            prop_assert!(has_flag_with_value(&args, "--dbus_name", &instance), "args: {:?}", args);
            prop_assert!(has_flag_with_value(&args, "--pos", &format_position(start)), "args: {:?}", args);
            prop_assert!(!has_flag(&args, "--loop"), "args: {:?}", args);
        }
    }
}
