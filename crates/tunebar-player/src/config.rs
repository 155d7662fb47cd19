/// Environment variable carrying the stream URL into the player command.
pub const AUDIO_URL_ENV: &str = "TUNEBAR_AUDIO_URL";
/// Environment variable carrying the gain (dB, two decimals) into the player command.
pub const GAIN_ENV: &str = "TUNEBAR_GAIN";

/// Default player invocation. `mpv` prints `position duration` status lines.
pub const DEFAULT_PLAYER_COMMAND: &str = "exec mpv --no-video --no-config \
--msg-level=all=error,statusline=status \
--term-status-msg='${=time-pos} ${=duration}' \
--af=volume=volume=\"${TUNEBAR_GAIN}dB\" \
\"$TUNEBAR_AUDIO_URL\"";

/// External player settings shared by every song.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Shell command template; the URL and gain are only visible through the environment.
    pub command: String,
    /// Shell used to run `command` (`<shell> -c <command>`).
    pub shell: String,
    /// Constant offset added to every song's gain, in dB.
    pub volume_db: f32,
    /// Multiplier applied to the song's replay gain.
    pub gain_mul: f32,
    /// Max bytes consumed from a player output stream per read.
    pub read_chunk: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_PLAYER_COMMAND.to_string(),
            shell: "/bin/sh".to_string(),
            volume_db: 0.0,
            gain_mul: 1.0,
            read_chunk: 1024,
        }
    }
}

impl PlayerConfig {
    /// Gain handed to the player for a song with `file_gain` dB replay gain.
    pub fn gain_for(&self, file_gain: f32) -> f32 {
        let gain = file_gain * self.gain_mul + self.volume_db;
        if gain.is_finite() { gain } else { self.volume_db }
    }

    /// `gain_for` formatted the way it is exported to the player.
    pub fn gain_env_value(&self, file_gain: f32) -> String {
        format!("{:.2}", self.gain_for(file_gain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_combines_multiplier_and_volume() {
        let cfg = PlayerConfig {
            volume_db: -3.0,
            gain_mul: 0.5,
            ..PlayerConfig::default()
        };
        assert_eq!(cfg.gain_for(4.0), -1.0);
        assert_eq!(cfg.gain_env_value(4.0), "-1.00");
    }

    #[test]
    fn non_finite_gain_falls_back_to_volume() {
        let cfg = PlayerConfig {
            volume_db: 2.0,
            ..PlayerConfig::default()
        };
        assert_eq!(cfg.gain_for(f32::NAN), 2.0);
    }

    #[test]
    fn default_command_reads_url_from_environment() {
        assert!(DEFAULT_PLAYER_COMMAND.contains(AUDIO_URL_ENV));
        assert!(DEFAULT_PLAYER_COMMAND.contains(GAIN_ENV));
        assert_eq!(PlayerConfig::default().read_chunk, 1024);
    }
}
