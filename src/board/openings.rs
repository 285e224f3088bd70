use super::point::Point;
use crate::error::Error;
use crate::error::Result;
use std::path::Path;

/// Load an openings file: one opening per line, moves encoded as
/// `<letter><number>` pairs (letter is x, 1-based number is y). Trailing
/// `\r` is stripped; blank lines are skipped.
pub fn load(path: &Path) -> Result<Vec<Vec<Point>>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot open openings {}: {e}", path.display())))?;
    Ok(text
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect())
}

/// Parse one opening line. Non-alphabetic fillers between pairs are
/// skipped; a letter with no following digits ends the line.
pub fn parse_line(line: &str) -> Vec<Point> {
    let mut moves = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            continue;
        }
        let x = c.to_ascii_lowercase() as i32 - 'a' as i32;
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        let Ok(y) = digits.parse::<i32>() else { break };
        moves.push(Point::new(x, y - 1));
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_letter_number_pairs() {
        assert_eq!(
            parse_line("h8i9j10"),
            vec![Point::new(7, 7), Point::new(8, 8), Point::new(9, 9)]
        );
    }

    #[test]
    fn uppercase_is_folded() {
        assert_eq!(parse_line("A1"), vec![Point::new(0, 0)]);
        assert_eq!(parse_line("H8"), vec![Point::new(7, 7)]);
    }

    #[test]
    fn fillers_between_pairs_are_skipped() {
        assert_eq!(
            parse_line("a1, b2 ,c3"),
            vec![Point::new(0, 0), Point::new(1, 1), Point::new(2, 2)]
        );
    }

    #[test]
    fn letter_without_digits_ends_the_line() {
        assert_eq!(parse_line("a1b"), vec![Point::new(0, 0)]);
        assert!(parse_line("x").is_empty());
    }

    #[test]
    fn loads_a_file_with_crlf_and_blanks() {
        let path = std::env::temp_dir().join(format!("arena-openings-{}", std::process::id()));
        std::fs::write(&path, "a1b2\r\n\nh8\r\n").unwrap();
        let openings = load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(openings.len(), 2);
        assert_eq!(openings[0], vec![Point::new(0, 0), Point::new(1, 1)]);
        assert_eq!(openings[1], vec![Point::new(7, 7)]);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load(Path::new("/nonexistent/openings.txt")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
