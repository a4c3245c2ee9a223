const ESCAPE: char = '\u{1b}';
const BELL: char = '\u{07}';

/// Removes ANSI escape sequences (colors, cursor movement, hyperlinks) from a line of output.
///
/// Handles CSI sequences (`ESC [ ... final`), OSC sequences (`ESC ] ... BEL` or `ESC ] ... ESC \`)
/// and two character escapes. An escape sequence cut off at the end of the line is dropped.
pub fn strip_colors(line: &str) -> String {
    if !line.contains(ESCAPE) {
        return line.to_owned();
    }

    let mut stripped = String::with_capacity(line.len());
    let mut characters = line.chars().peekable();
    while let Some(character) = characters.next() {
        if character != ESCAPE {
            stripped.push(character);
            continue;
        }

        match characters.next() {
            Some('[') => {
                // Parameter and intermediate bytes run until the final byte in `@..=~`.
                for character in characters.by_ref() {
                    if ('@'..='~').contains(&character) {
                        break;
                    }
                }
            }
            Some(']') => {
                while let Some(character) = characters.next() {
                    if character == BELL {
                        break;
                    }
                    if character == ESCAPE && characters.peek() == Some(&'\\') {
                        characters.next();
                        break;
                    }
                }
            }
            Some(_) | None => {}
        }
    }
    stripped
}
