use crate::MAX_NAME_LENGTH;
use crate::MAX_VERSION_LENGTH;
use crate::META_TIMEOUT_MS;
use crate::MIN_TURN_TIMEOUT_MS;
use crate::Millis;
use crate::error::Error;
use crate::error::Result;
use crate::subprocess::Channel;

/// One bot subprocess behind the Gomocup-style line protocol.
///
/// Owns the identity announced over `ABOUT` (falling back to the command
/// basename when the bot misbehaves) and the chatter-tolerant read loop:
/// `MESSAGE`/`DEBUG`/`UNKNOWN` lines are logged and skipped while the
/// remaining deadline shrinks by the observed wall time.
pub struct Player {
    chan: Option<Channel>,
    tag: &'static str,
    cmd: String,
    name: String,
    version: String,
}

impl Player {
    pub fn new(cmd: &str, tag: &'static str) -> Self {
        let basename = cmd
            .split_whitespace()
            .next()
            .unwrap_or(cmd)
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(cmd)
            .to_string();
        Self {
            chan: None,
            tag,
            cmd: cmd.to_string(),
            name: basename,
            version: String::new(),
        }
    }

    pub fn start(&mut self, max_mem_bytes: i64, env: &[(String, String)]) -> Result<()> {
        self.chan = Some(Channel::spawn(&self.cmd, max_mem_bytes, env)?);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(chan) = &mut self.chan {
            chan.terminate();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn pid(&self) -> i32 {
        self.chan.as_ref().map(Channel::pid).unwrap_or(0)
    }

    pub fn peak_mem_kb(&self) -> i64 {
        self.chan.as_ref().map(Channel::peak_mem_kb).unwrap_or(0)
    }

    pub fn send(&mut self, cmd: &str) -> Result<()> {
        log::debug!("-> {}: {}", self.tag, cmd);
        self.chan()?.write_line(cmd)
    }

    /// Read the next substantive line within `timeout_ms`, tolerating
    /// chatter. Returns the line and total observed wall time; a deadline
    /// expiry is a player error.
    pub fn read(&mut self, timeout_ms: Millis) -> Result<(String, Millis)> {
        let tag = self.tag;
        let chan = self.chan()?;
        let mut remaining = timeout_ms;
        let mut total = 0;
        loop {
            let (line, elapsed) = chan.read_line(remaining)?;
            total += elapsed;
            let Some(line) = line else {
                return Err(Error::Player("Timeout".into()));
            };
            if line.starts_with("MESSAGE") || line.starts_with("DEBUG") {
                log::info!("{tag} says: {line}");
                remaining = (remaining - elapsed).max(MIN_TURN_TIMEOUT_MS);
                continue;
            }
            if line.starts_with("UNKNOWN") {
                log::warn!("{tag} UNKNOWN cmd: {line}");
                remaining = (remaining - elapsed).max(MIN_TURN_TIMEOUT_MS);
                continue;
            }
            return Ok((line, total));
        }
    }

    /// `ABOUT` exchange: extract and validate the announced name/version.
    pub fn meta(&mut self) -> Result<()> {
        self.send("ABOUT")?;
        let (line, _) = self.read(META_TIMEOUT_MS)?;
        if let Some(name) = extract_quoted(&line, "name") {
            if valid_name(&name) {
                self.name = name;
            } else {
                log::warn!("Bot {} invalid name: '{name}'", self.cmd);
            }
        }
        if let Some(version) = extract_quoted(&line, "version") {
            self.version = clean_version(&version);
        }
        Ok(())
    }

    fn chan(&mut self) -> Result<&mut Channel> {
        self.chan
            .as_mut()
            .ok_or_else(|| Error::System("player not started".into()))
    }
}

/// pull the value of `key="..."` out of a descriptor line
fn extract_quoted(line: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let start = line.find(&pattern)? + pattern.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

/// announced names are display strings: short, printable, no quoting risk
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'))
}

/// keep a leading dotted-numeric prefix, else truncate the raw string
fn clean_version(raw: &str) -> String {
    let mut end = 0;
    let bytes = raw.as_bytes();
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end < bytes.len() && bytes[end] == b'.' && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
            end += 1;
        } else {
            break;
        }
    }
    if end > 0 {
        raw[..end].to_string()
    } else {
        raw.chars().take(MAX_VERSION_LENGTH).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_fields() {
        let line = r#"name="Embryo", version="21.4", author="x""#;
        assert_eq!(extract_quoted(line, "name").as_deref(), Some("Embryo"));
        assert_eq!(extract_quoted(line, "version").as_deref(), Some("21.4"));
        assert_eq!(extract_quoted(line, "country"), None);
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("Embryo 21_4.x-b"));
        assert!(!valid_name(""));
        assert!(!valid_name("seventeen-letters-x"));
        assert!(!valid_name("bad\"quote"));
        assert!(!valid_name("emoji🎉"));
    }

    #[test]
    fn version_keeps_dotted_numeric_prefix() {
        assert_eq!(clean_version("21.4.1"), "21.4.1");
        assert_eq!(clean_version("21.4-beta"), "21.4");
        assert_eq!(clean_version("7"), "7");
        assert_eq!(clean_version("v2.deadbeefcafe"), "v2.deadb");
        assert_eq!(clean_version("experimental-build"), "experime");
    }

    #[test]
    fn basename_is_the_fallback_name() {
        let player = Player::new("/opt/bots/embryo --fast", "P1");
        assert_eq!(player.name(), "embryo");
        assert_eq!(player.version(), "");
    }

    #[test]
    fn meta_falls_back_on_invalid_name() {
        let mut player = Player::new(
            "/bin/sh -c 'read l; echo name=\\\"***\\\" version=\\\"1.2\\\"'",
            "P1",
        );
        player.start(0, &[]).unwrap();
        player.meta().unwrap();
        assert_eq!(player.name(), "sh");
        assert_eq!(player.version(), "1.2");
        player.stop();
    }

    #[test]
    fn read_skips_chatter_lines() {
        let mut player = Player::new(
            "/bin/sh -c 'echo MESSAGE thinking; echo DEBUG depth 3; echo 4,5'",
            "P2",
        );
        player.start(0, &[]).unwrap();
        let (line, _) = player.read(2_000).unwrap();
        assert_eq!(line, "4,5");
        player.stop();
    }

    #[test]
    fn timeout_is_a_player_error() {
        let mut player = Player::new("/bin/sh -c 'sleep 5'", "P1");
        player.start(0, &[]).unwrap();
        let err = player.read(100).unwrap_err();
        assert!(matches!(err, Error::Player(msg) if msg == "Timeout"));
        player.stop();
    }
}
