//! Texture property (`.txi`) files.
//!
//! A TXI file is a flat list of `token value` lines describing how the engine treats a texture.
//! [`Txi`] keeps a typed value for every known token, starting from the engine defaults, and
//! remembers which tokens were touched so that only those are written back.

use std::io::{self, Write};

use once_cell::sync::Lazy;

use crate::error::{Diagnostics, Parsed, Warning};
use crate::lex::{tokenize, Line};
use crate::write::{fmt_float, fmt_tuple};

/// Number of entries in `channelscale` and `channeltranslate`.
pub const CHANNELS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum TxiValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(String),
    Color([f32; 3]),
    List([f32; CHANNELS]),
}

impl TxiValue {
    fn same_kind(&self, other: &TxiValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

macro_rules! txi_tokens {
    ($($kind:ident $name:literal = $default:expr,)*) => {
        static TOKENS: Lazy<Vec<(&'static str, TxiValue)>> = Lazy::new(|| vec![
            $(($name, TxiValue::$kind($default)),)*
        ]);
    };
}

txi_tokens! {
    Text "blending" = String::new(),
    Text "proceduretype" = String::new(),
    Text "filter" = String::new(),
    Int "filerange" = 0,
    Int "defaultwidth" = 0,
    Int "defaultheight" = 0,
    Int "downsamplemax" = 15,
    Int "downsamplemin" = 0,
    Bool "mipmap" = true,
    Bool "maptexelstopixels" = false,
    Float "gamma" = 1.0,
    Bool "isbumpmap" = false,
    Int "clamp" = 1,
    Float "alphamean" = 0.0,
    Bool "isdiffusebumpmap" = false,
    Bool "isspecularbumpmap" = false,
    Float "bumpmapscaling" = 0.0,
    Color "specularcolor" = [1.0, 1.0, 1.0],
    Bool "islightmap" = false,
    Bool "compresstexture" = false,
    Int "numx" = 1,
    Int "numy" = 1,
    Bool "cube" = false,
    Float "bumpintensity" = 0.0,
    Bool "temporary" = false,
    Bool "useglobalalpha" = false,
    Bool "isenvironmentmapped" = false,
    Float "envmapalpha" = 0.0,
    Float "diffusebumpintensity" = 0.0,
    Float "specularbumpintensity" = 0.0,
    Text "bumpmaptexture" = String::new(),
    Text "bumpyshinytexture" = String::new(),
    Text "envmaptexture" = String::new(),
    Bool "decal" = false,
    Bool "renderbmlmtype" = false,
    Float "wateralpha" = 0.0,
    Int "arturowidth" = 15,
    Int "arturoheight" = 15,
    Float "forcecyclespeed" = 0.0,
    Float "anglecyclespeed" = 0.0,
    Int "waterwidth" = 0,
    Int "waterheight" = 0,
    List "channelscale" = [0.0; CHANNELS],
    List "channeltranslate" = [0.0; CHANNELS],
    Bool "distort" = false,
    Bool "distortangle" = false,
    Float "distortionamplitude" = 0.0,
    Float "speed" = 1.0,
    Float "fps" = 1.0,
    Int "numchars" = 0,
    Float "fontheight" = 0.0,
    Float "baselineheight" = 0.0,
    Float "texturewidth" = 0.0,
    Float "spacingR" = 0.0,
    Float "spacingB" = 0.0,
}

/// Canonical spelling of a token, matched case-insensitively.
fn lookup(token: &str) -> Option<&'static str> {
    TOKENS.iter().map(|(name, _)| *name).find(|name| name.eq_ignore_ascii_case(token))
}

/// `channelscale2` style tokens addressing one list entry.
fn list_entry(token: &str) -> Option<(&'static str, usize)> {
    let (split, _) = token.char_indices().last()?;
    let (base, idx) = token.split_at(split);
    let idx: usize = idx.parse().ok().filter(|&idx| idx < CHANNELS)?;
    let base = lookup(base)?;
    matches!(default_of(base), Some(TxiValue::List(_))).then(|| (base, idx))
}

fn default_of(token: &str) -> Option<&'static TxiValue> {
    TOKENS.iter().find(|(name, _)| *name == token).map(|(_, value)| value)
}

/// Texture properties with modification tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct Txi {
    values: Vec<TxiValue>,
    /// Canonical token names in the order they were first modified.
    modified: Vec<&'static str>,
}

impl Default for Txi {
    fn default() -> Self {
        Txi { values: TOKENS.iter().map(|(_, value)| value.clone()).collect(), modified: vec![] }
    }
}

impl Txi {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(token: &str) -> Option<usize> {
        TOKENS.iter().position(|(name, _)| name.eq_ignore_ascii_case(token))
    }

    pub fn get(&self, token: &str) -> Option<&TxiValue> {
        Self::index(token).map(|idx| &self.values[idx])
    }

    /// Stores `value` and marks the token modified.
    pub fn set(&mut self, token: &str, value: TxiValue) -> Result<(), String> {
        let idx = Self::index(token).ok_or_else(|| format!("unknown token `{}`", token))?;
        if !self.values[idx].same_kind(&value) {
            return Err(format!("`{}` cannot hold {:?}", TOKENS[idx].0, value));
        }
        self.values[idx] = value;
        self.touch(TOKENS[idx].0);
        Ok(())
    }

    fn touch(&mut self, name: &'static str) {
        if !self.modified.contains(&name) {
            self.modified.push(name);
        }
    }

    pub fn is_modified(&self, token: &str) -> bool {
        lookup(token).map_or(false, |name| self.modified.contains(&name))
    }

    /// Modified token names in first-modification order.
    pub fn modified(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modified.iter().copied()
    }

    /// Reads a TXI file. Every recognised token counts as modified, even when it restates a
    /// default; unknown tokens and their numeric rows are skipped.
    pub fn parse(text: &str) -> Parsed<Txi> {
        let lines = tokenize(text);
        let mut diag = Diagnostics::default();
        let mut txi = Txi::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            i += 1;
            if line.is_numeric() {
                continue;
            }
            let token = line.tokens[0];
            if let Some((base, entry)) = list_entry(token) {
                match line.f32_at(1) {
                    Ok(val) => txi.set_list_entry(base, entry, val),
                    Err(message) => diag.push(Warning::malformed(line.number, token, message)),
                }
                continue;
            }
            let Some(idx) = Self::index(token) else {
                log::debug!("line {}: ignoring txi token `{}`", line.number, token);
                continue;
            };
            match read_value(&TOKENS[idx].1, line, &lines[i..], &mut diag) {
                Ok((value, rows)) => {
                    i += rows;
                    txi.values[idx] = value;
                    txi.touch(TOKENS[idx].0);
                }
                Err(message) => diag.push(Warning::malformed(line.number, token, message)),
            }
        }
        diag.finish(txi)
    }

    fn set_list_entry(&mut self, base: &'static str, entry: usize, val: f32) {
        if let Some(idx) = Self::index(base) {
            if let TxiValue::List(list) = &mut self.values[idx] {
                list[entry] = val;
                self.touch(base);
            }
        }
    }

    /// Writes the modified tokens, preceded by `# <header>` when given.
    pub fn write(&self, w: &mut impl Write, header: Option<&str>) -> io::Result<()> {
        if let Some(header) = header {
            writeln!(w, "# {}", header)?;
        }
        for &name in &self.modified {
            let Some(value) = self.get(name) else { continue };
            match value {
                TxiValue::Bool(val) => writeln!(w, "{} {}", name, if *val { 1 } else { 0 })?,
                TxiValue::Int(val) => writeln!(w, "{} {}", name, val)?,
                TxiValue::Float(val) => writeln!(w, "{} {}", name, fmt_float(*val))?,
                TxiValue::Text(val) => writeln!(w, "{} {}", name, val)?,
                TxiValue::Color(val) => writeln!(w, "{} {}", name, fmt_tuple(val))?,
                TxiValue::List(vals) => {
                    writeln!(w, "{} {}", name, CHANNELS)?;
                    for val in vals {
                        writeln!(w, "{}", fmt_float(*val))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_text(&self, header: Option<&str>) -> String {
        let mut out = vec![];
        // writing into a Vec cannot fail
        let _ = self.write(&mut out, header);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Parses the value for a token whose default is `kind`. Returns the value and how many
/// following lines it consumed.
fn read_value(kind: &TxiValue, line: &Line, rest: &[Line], diag: &mut Diagnostics) -> Result<(TxiValue, usize), String> {
    let value = match kind {
        TxiValue::Bool(_) => {
            let token = line.arg(1).ok_or("missing value")?;
            match token.to_ascii_lowercase().as_str() {
                "true" => TxiValue::Bool(true),
                "false" => TxiValue::Bool(false),
                _ => TxiValue::Bool(line.i32_at(1)? >= 1),
            }
        }
        TxiValue::Int(_) => TxiValue::Int(line.i32_at(1)?),
        TxiValue::Float(_) => TxiValue::Float(line.f32_at(1)?),
        TxiValue::Text(_) => TxiValue::Text(line.tokens[1..].join(" ")),
        TxiValue::Color(_) => TxiValue::Color(line.floats::<3>(1)?),
        TxiValue::List(_) => {
            let count = usize::try_from(line.i32_at(1)?).map_err(|_| "negative entry count".to_owned())?;
            let rows = rest.iter().take(count).take_while(|row| row.is_numeric()).collect::<Vec<_>>();
            if rows.len() < count {
                return Err(format!("expected {} entries, found {}", count, rows.len()));
            }
            if count > CHANNELS {
                diag.push(Warning::malformed(line.number, line.tokens[0], format!("{} entries, only the first {} are kept", count, CHANNELS)));
            }
            let mut list = [0.0; CHANNELS];
            for (slot, row) in list.iter_mut().zip(&rows) {
                *slot = row.f32_at(0)?;
            }
            return Ok((TxiValue::List(list), count));
        }
    };
    Ok((value, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unmodified() {
        let txi = Txi::new();
        assert_eq!(txi.get("mipmap"), Some(&TxiValue::Bool(true)));
        assert_eq!(txi.get("downsamplemax"), Some(&TxiValue::Int(15)));
        assert_eq!(txi.get("specularcolor"), Some(&TxiValue::Color([1.0; 3])));
        assert_eq!(txi.modified().count(), 0);
        assert_eq!(txi.to_text(None), "");
    }

    #[test]
    fn test_parse_marks_tokens() {
        let text = "\
# comment
mipmap 0
isbumpmap TRUE
gamma 1.5
bumpmaptexture tex_bump
specularcolor 0.5 0.25 1
decal 1
upperleftcoords 2
0.1 0.2 0
0.3 0.4 0
";
        let parsed = Txi::parse(text);
        assert!(parsed.warnings.is_empty());
        let txi = parsed.value;
        assert_eq!(txi.get("mipmap"), Some(&TxiValue::Bool(false)));
        assert_eq!(txi.get("isbumpmap"), Some(&TxiValue::Bool(true)));
        assert_eq!(txi.get("gamma"), Some(&TxiValue::Float(1.5)));
        assert_eq!(txi.get("bumpmaptexture"), Some(&TxiValue::Text("tex_bump".to_owned())));
        assert_eq!(txi.get("specularcolor"), Some(&TxiValue::Color([0.5, 0.25, 1.0])));
        assert_eq!(
            txi.modified().collect::<Vec<_>>(),
            vec!["mipmap", "isbumpmap", "gamma", "bumpmaptexture", "specularcolor", "decal"]
        );
    }

    #[test]
    fn test_channel_lists() {
        let text = "channelscale 4\n1\n0.5\n0.5\n1\nchanneltranslate3 0.25\nspacingr 2\n";
        let txi = Txi::parse(text).value;
        assert_eq!(txi.get("channelscale"), Some(&TxiValue::List([1.0, 0.5, 0.5, 1.0])));
        assert_eq!(txi.get("channeltranslate"), Some(&TxiValue::List([0.0, 0.0, 0.0, 0.25])));
        assert!(txi.is_modified("spacingR"));

        let out = txi.to_text(Some("written by a test"));
        assert_eq!(
            out,
            "# written by a test\nchannelscale 4\n1\n0.5\n0.5\n1\nchanneltranslate 4\n0\n0\n0\n0.25\nspacingR 2\n"
        );
    }

    #[test]
    fn test_malformed_lines_warn() {
        let parsed = Txi::parse("gamma bright\nchannelscale 4\n1\nnumx 2\n");
        assert_eq!(parsed.warnings.len(), 2);
        assert_eq!(parsed.warnings[0].line, Some(1));
        assert_eq!(parsed.warnings[1].line, Some(2));
        assert_eq!(parsed.value.modified().collect::<Vec<_>>(), vec!["numx"]);
    }

    #[test]
    fn test_long_channel_list_warns() {
        let parsed = Txi::parse("channelscale 5\n1\n0.5\n0.5\n1\n0.75\ngamma 2\n");
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].line, Some(1));
        let txi = parsed.value;
        assert_eq!(txi.get("channelscale"), Some(&TxiValue::List([1.0, 0.5, 0.5, 1.0])));
        assert_eq!(txi.get("gamma"), Some(&TxiValue::Float(2.0)));
    }

    #[test]
    fn test_set_keeps_first_modification_order() {
        let mut txi = Txi::new();
        txi.set("clamp", TxiValue::Int(3)).unwrap();
        txi.set("mipmap", TxiValue::Bool(false)).unwrap();
        txi.set("clamp", TxiValue::Int(0)).unwrap();
        assert!(txi.set("clamp", TxiValue::Float(1.0)).is_err());
        assert!(txi.set("nonsense", TxiValue::Int(1)).is_err());
        assert_eq!(txi.to_text(None), "clamp 0\nmipmap 0\n");
    }
}
