//! Line tokenizer and the keyed-list scanner shared by both codecs.

use std::str::FromStr;

/// One non-blank source line split on whitespace, comments removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Line<'a> {
    /// Line number in the source text (1-indexed).
    pub number: usize,
    /// Never empty.
    pub tokens: Vec<&'a str>,
}

impl<'a> Line<'a> {
    /// The first token, lowercased. Dispatch is case-insensitive on this only.
    pub fn label(&self) -> String {
        self.tokens[0].to_ascii_lowercase()
    }

    pub fn arg(&self, idx: usize) -> Option<&'a str> {
        self.tokens.get(idx).copied()
    }

    pub fn is_numeric(&self) -> bool {
        looks_numeric(self.tokens[0])
    }

    /// The tokens re-joined with single spaces.
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn parse_at<T: FromStr>(&self, idx: usize) -> Result<T, String> {
        let token = self.arg(idx).ok_or_else(|| format!("missing value #{}", idx))?;
        token.parse().map_err(|_| format!("`{}` is not a valid number", token))
    }

    pub fn f32_at(&self, idx: usize) -> Result<f32, String> {
        self.parse_at(idx)
    }

    /// Integer fields are sometimes written as `1.0`; accept that when the value is whole.
    pub fn i32_at(&self, idx: usize) -> Result<i32, String> {
        self.parse_at::<i32>(idx).or_else(|err| match self.parse_at::<f64>(idx) {
            Ok(val) if val.fract() == 0.0 && (i32::MIN as f64..=i32::MAX as f64).contains(&val) => Ok(val as i32),
            Ok(val) => Err(format!("`{}` is out of range", val)),
            _ => Err(err),
        })
    }

    /// Full-range unsigned field such as a smoothgroup mask. A whole float is accepted only when it fits.
    pub fn u32_at(&self, idx: usize) -> Result<u32, String> {
        self.parse_at::<u32>(idx).or_else(|err| match self.parse_at::<f64>(idx) {
            Ok(val) if val.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&val) => Ok(val as u32),
            Ok(val) => Err(format!("`{}` is out of range", val)),
            _ => Err(err),
        })
    }

    pub fn floats<const N: usize>(&self, from: usize) -> Result<[f32; N], String> {
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.f32_at(from + i)?;
        }
        Ok(out)
    }

    pub fn float_vec(&self, from: usize, count: usize) -> Result<Vec<f32>, String> {
        (from..from + count).map(|idx| self.f32_at(idx)).collect()
    }
}

/// Strips `#` comments and splits `text` into non-blank token lines.
///
/// Comment removal happens per physical line before tokenizing, since `#` may
/// appear glued to the end of a token.
pub fn tokenize(text: &str) -> Vec<Line<'_>> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let content = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let tokens: Vec<&str> = content.split_whitespace().collect();
            (!tokens.is_empty()).then(|| Line { number: idx + 1, tokens })
        })
        .collect()
}

/// True for signed decimal and exponential float forms. Identifiers such as
/// `inf`, `nan` or `e5` are rejected even though they would parse as floats.
pub fn looks_numeric(token: &str) -> bool {
    let body = token.strip_prefix(['+', '-']).unwrap_or(token);
    match body.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => token.parse::<f64>().is_ok(),
        _ => false,
    }
}

/// Index of the first line at or after `start` whose first token is not
/// numeric, or `None` when the numeric run reaches the end of `lines`.
pub fn scan_list_end(lines: &[Line], start: usize) -> Option<usize> {
    lines.iter().enumerate().skip(start).find(|(_, line)| !line.is_numeric()).map(|(idx, _)| idx)
}

/// Like [`scan_list_end`], but treats a missing terminator as the end of the slice.
pub(crate) fn list_end(lines: &[Line], start: usize) -> usize {
    scan_list_end(lines, start).unwrap_or(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blank_lines() {
        let lines = tokenize("# header\nnewmodel foo # trailing\n\n   \n  bitmap tex#comment\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].tokens, vec!["newmodel", "foo"]);
        assert_eq!(lines[0].number, 2);
        assert_eq!(lines[1].tokens, vec!["bitmap", "tex"]);
        assert_eq!(lines[1].number, 5);
    }

    #[test]
    fn test_label_is_lowercased() {
        let lines = tokenize("  NewModel Foo");
        assert_eq!(lines[0].label(), "newmodel");
        assert_eq!(lines[0].arg(1), Some("Foo"));
    }

    #[test]
    fn test_looks_numeric() {
        for token in ["0", "-1", "+2.5", ".5", "-.25", "1e-05", "3.4E+38", "7."] {
            assert!(looks_numeric(token), "{}", token);
        }
        for token in ["inf", "nan", "-infinity", "e5", "node", "", "-", "1.2.3", "5x"] {
            assert!(!looks_numeric(token), "{}", token);
        }
    }

    #[test]
    fn test_scan_list_end_counts_numeric_run() {
        let lines = tokenize("0 1 2\n3 4 5\n6 7 8\nendlist\n");
        assert_eq!(scan_list_end(&lines, 0), Some(3));
        assert_eq!(scan_list_end(&lines, 3), Some(3));
    }

    #[test]
    fn test_scan_list_end_without_terminator() {
        let lines = tokenize("0 1\n2 3\n");
        assert_eq!(scan_list_end(&lines, 0), None);
        assert_eq!(list_end(&lines, 0), 2);
        assert_eq!(scan_list_end(&lines, 5), None);
    }

    #[test]
    fn test_scan_list_end_ignores_whitespace() {
        let tight = tokenize("1 2\n3 4\nfoo\n");
        let loose = tokenize("\t  1    2  \n\n   3\t4   \n\n   foo  \n");
        assert_eq!(scan_list_end(&tight, 0), Some(2));
        assert_eq!(scan_list_end(&loose, 0), Some(2));
    }

    #[test]
    fn test_number_accessors() {
        let line = &tokenize("position 1.5 -2 3e1 x")[0];
        assert_eq!(line.floats::<3>(1), Ok([1.5, -2.0, 30.0]));
        assert!(line.f32_at(4).is_err());
        assert!(line.f32_at(5).is_err());
        let line = &tokenize("render 1.0")[0];
        assert_eq!(line.i32_at(1), Ok(1));
    }

    #[test]
    fn test_wide_integer_fields() {
        let line = &tokenize("0 1 2 2147483648 4294967295 4294967296 -1 3e9 1e12")[0];
        assert_eq!(line.u32_at(3), Ok(0x8000_0000));
        assert_eq!(line.u32_at(4), Ok(u32::MAX));
        assert!(line.u32_at(5).is_err());
        assert!(line.u32_at(6).is_err());
        assert_eq!(line.u32_at(7), Ok(3_000_000_000));
        assert!(line.i32_at(3).is_err());
        assert!(line.i32_at(8).is_err());
    }
}
