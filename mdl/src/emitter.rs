//! The particle emitter parameter block.
//!
//! Every emitter directive is described once in [`EMITTER_PARAMS`], which both the reader and the
//! writer dispatch through. Animatable parameters also carry the controller name used in animation
//! blocks.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use once_cell::sync::Lazy;

use crate::types::Vec3d;
use crate::write::{fmt_float, fmt_tuple};

/// How a Rust field is read from directive tokens and written back.
pub trait EmitterField: Sized {
    const ARITY: usize = 1;
    const INTEGER: bool = false;

    fn read_field(tokens: &[&str]) -> Result<Self, String>;
    /// `None` means the directive is omitted on export.
    fn write_field(&self) -> Option<String>;
    /// Numeric value for animation channels; empty for non-numeric fields.
    fn values(&self) -> Vec<f32> {
        vec![]
    }
    fn set_values(&mut self, _values: &[f32]) {}
}

fn first<'a>(tokens: &[&'a str]) -> Result<&'a str, String> {
    tokens.first().copied().ok_or_else(|| "missing value".to_owned())
}

fn number<T: FromStr>(token: &str) -> Result<T, String> {
    token.parse().map_err(|_| format!("`{}` is not a valid number", token))
}

impl EmitterField for f32 {
    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        number(first(tokens)?)
    }
    fn write_field(&self) -> Option<String> {
        Some(fmt_float(*self))
    }
    fn values(&self) -> Vec<f32> {
        vec![*self]
    }
    fn set_values(&mut self, values: &[f32]) {
        if let Some(&val) = values.first() {
            *self = val;
        }
    }
}

impl EmitterField for i32 {
    const INTEGER: bool = true;

    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        let token = first(tokens)?;
        // game-side integers are sometimes written with a fraction
        token.parse().or_else(|_| number::<f32>(token).map(|val| val.round() as i32))
    }
    fn write_field(&self) -> Option<String> {
        Some(self.to_string())
    }
    fn values(&self) -> Vec<f32> {
        vec![*self as f32]
    }
    fn set_values(&mut self, values: &[f32]) {
        if let Some(&val) = values.first() {
            *self = val.round() as i32;
        }
    }
}

impl EmitterField for bool {
    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        Ok(i32::read_field(tokens)? != 0)
    }
    fn write_field(&self) -> Option<String> {
        Some(if *self { "1" } else { "0" }.to_owned())
    }
}

impl EmitterField for String {
    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        Ok(first(tokens)?.to_owned())
    }
    fn write_field(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.clone())
    }
}

impl EmitterField for Vec3d {
    const ARITY: usize = 3;

    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        match tokens {
            [x, y, z, ..] => Ok(Vec3d::new(number(x)?, number(y)?, number(z)?)),
            _ => Err(format!("expected 3 values, found {}", tokens.len())),
        }
    }
    fn write_field(&self) -> Option<String> {
        Some(fmt_tuple(&[self.x, self.y, self.z]))
    }
    fn values(&self) -> Vec<f32> {
        vec![self.x, self.y, self.z]
    }
    fn set_values(&mut self, values: &[f32]) {
        if let [x, y, z, ..] = *values {
            *self = Vec3d::new(x, y, z);
        }
    }
}

impl<E: EmitterEnum> EmitterField for Option<E> {
    fn read_field(tokens: &[&str]) -> Result<Self, String> {
        Ok(Some(E::from_token(first(tokens)?)))
    }
    fn write_field(&self) -> Option<String> {
        self.as_ref().map(|val| val.to_string())
    }
}

/// A closed set of keywords plus a catch-all that keeps unknown spellings for export.
pub trait EmitterEnum: Display {
    fn from_token(token: &str) -> Self;
}

macro_rules! emitter_enum {
    ($($(#[$meta:meta])* pub enum $tyname:ident {
        $($name:ident = $kw:literal $(| $alt:literal)*,)*
    })*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub enum $tyname {
                $($name,)*
                Unrecognized(String),
            }

            impl EmitterEnum for $tyname {
                fn from_token(token: &str) -> Self {
                    $(if token.eq_ignore_ascii_case($kw) $(|| token.eq_ignore_ascii_case($alt))* {
                        return $tyname::$name;
                    })*
                    $tyname::Unrecognized(token.to_owned())
                }
            }

            impl Display for $tyname {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self {
                        $($tyname::$name => f.write_str($kw),)*
                        $tyname::Unrecognized(token) => f.write_str(token),
                    }
                }
            }
        )*
    };
}

emitter_enum! {
    pub enum SpawnType {
        Normal = "0",
        Trail = "1",
    }

    pub enum UpdateType {
        Fountain = "Fountain",
        Single = "Single",
        Explosion = "Explosion",
        Lightning = "Lightning",
    }

    pub enum RenderType {
        Normal = "Normal",
        BillboardToLocalZ = "Billboard_to_Local_Z",
        BillboardToWorldZ = "Billboard_to_World_Z",
        AlignedToWorldZ = "Aligned_to_World_Z",
        AlignedToParticleDir = "Aligned_to_Particle_Dir",
        Motion = "Motion",
    }

    pub enum BlendType {
        Normal = "Normal",
        Lighten = "Lighten",
        PunchThrough = "Punch-Through" | "punchthrough",
    }
}

/// One row of the dispatch table.
pub struct EmitterParam {
    /// Directive name as written in a geometry block.
    pub name: &'static str,
    /// Controller name in animation blocks, for animatable parameters.
    pub controller: Option<&'static str>,
    pub arity: usize,
    pub integer: bool,
    pub read: fn(&mut Emitter, &[&str]) -> Result<(), String>,
    pub write: fn(&Emitter) -> Option<String>,
    pub values: fn(&Emitter) -> Vec<f32>,
    pub set_values: fn(&mut Emitter, &[f32]),
}

impl std::fmt::Debug for EmitterParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitterParam").field("name", &self.name).field("controller", &self.controller).finish()
    }
}

macro_rules! emitter_params {
    (@controller) => { None };
    (@controller $key:literal) => { Some($key) };
    ($($field:ident: $ty:ty = $default:expr => $name:literal $(, key $key:literal)?;)*) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Emitter {
            $(pub $field: $ty,)*
        }

        impl Default for Emitter {
            fn default() -> Self {
                Emitter { $($field: $default,)* }
            }
        }

        /// All emitter directives in export order.
        pub static EMITTER_PARAMS: &[EmitterParam] = &[$(
            EmitterParam {
                name: $name,
                controller: emitter_params!(@controller $($key)?),
                arity: <$ty as EmitterField>::ARITY,
                integer: <$ty as EmitterField>::INTEGER,
                read: {
                    fn read(emitter: &mut Emitter, tokens: &[&str]) -> Result<(), String> {
                        emitter.$field = EmitterField::read_field(tokens)?;
                        Ok(())
                    }
                    read
                },
                write: {
                    fn write(emitter: &Emitter) -> Option<String> {
                        emitter.$field.write_field()
                    }
                    write
                },
                values: {
                    fn values(emitter: &Emitter) -> Vec<f32> {
                        emitter.$field.values()
                    }
                    values
                },
                set_values: {
                    fn set_values(emitter: &mut Emitter, values: &[f32]) {
                        emitter.$field.set_values(values)
                    }
                    set_values
                },
            },
        )*];
    };
}

emitter_params! {
    deadspace: f32 = 0.0 => "deadspace";
    blastradius: f32 = 0.0 => "blastradius";
    blastlength: f32 = 0.0 => "blastlength";
    num_branches: i32 = 0 => "numBranches";
    controlptsmoothing: i32 = 0 => "controlptsmoothing";
    xgrid: i32 = 0 => "xgrid";
    ygrid: i32 = 0 => "ygrid";
    spawntype: Option<SpawnType> = None => "spawntype";
    update: Option<UpdateType> = None => "update";
    render: Option<RenderType> = None => "render";
    blend: Option<BlendType> = None => "blend";
    texture: String = String::new() => "texture";
    chunk_name: String = String::new() => "chunkName";
    twosidedtex: bool = false => "twosidedtex";
    looping: bool = false => "loop";
    renderorder: i32 = 0 => "renderorder";
    frame_blending: bool = false => "m_bFrameBlending";
    depth_texture_name: String = String::new() => "m_sDepthTextureName";
    p2p: bool = false => "p2p";
    p2p_sel: bool = false => "p2p_sel";
    affected_by_wind: bool = false => "affectedByWind";
    is_tinted: bool = false => "m_isTinted";
    bounce: bool = false => "bounce";
    random: bool = false => "random";
    inherit: bool = false => "inherit";
    inheritvel: bool = false => "inheritvel";
    inherit_local: bool = false => "inherit_local";
    splat: bool = false => "splat";
    inherit_part: bool = false => "inherit_part";
    depth_texture: bool = false => "depth_texture";
    alphastart: f32 = 0.0 => "alphastart", key "alphaStart";
    alphamid: f32 = 0.0 => "alphamid", key "alphaMid";
    alphaend: f32 = 0.0 => "alphaend", key "alphaEnd";
    birthrate: i32 = 0 => "birthrate", key "birthrate";
    random_birthrate: i32 = 0 => "m_frandombirthrate", key "m_fRandomBirthRate";
    bounce_co: f32 = 0.0 => "bounce_co", key "bounce_co";
    combinetime: f32 = 0.0 => "combinetime", key "combinetime";
    drag: f32 = 0.0 => "drag", key "drag";
    fps: i32 = 0 => "fps", key "fps";
    frameend: i32 = 0 => "frameend", key "frameEnd";
    framestart: i32 = 0 => "framestart", key "frameStart";
    grav: f32 = 0.0 => "grav", key "grav";
    lifeexp: f32 = 0.0 => "lifeexp", key "lifeExp";
    mass: f32 = 0.0 => "mass", key "mass";
    p2p_bezier2: f32 = 0.0 => "p2p_bezier2", key "p2p_bezier2";
    p2p_bezier3: f32 = 0.0 => "p2p_bezier3", key "p2p_bezier3";
    particlerot: f32 = 0.0 => "particlerot", key "particleRot";
    randvel: f32 = 0.0 => "randvel", key "randvel";
    sizestart: f32 = 0.0 => "sizestart", key "sizeStart";
    sizemid: f32 = 0.0 => "sizemid", key "sizeMid";
    sizeend: f32 = 0.0 => "sizeend", key "sizeEnd";
    sizestart_y: f32 = 0.0 => "sizestart_y", key "sizeStart_y";
    sizemid_y: f32 = 0.0 => "sizemid_y", key "sizeMid_y";
    sizeend_y: f32 = 0.0 => "sizeend_y", key "sizeEnd_y";
    spread: f32 = 0.0 => "spread", key "spread";
    threshold: f32 = 0.0 => "threshold", key "threshold";
    velocity: f32 = 0.0 => "velocity", key "velocity";
    xsize: i32 = 2 => "xsize", key "xsize";
    ysize: i32 = 2 => "ysize", key "ysize";
    blurlength: f32 = 0.0 => "blurlength", key "blurlength";
    lightningdelay: f32 = 0.0 => "lightningdelay", key "lightningDelay";
    lightningradius: f32 = 0.0 => "lightningradius", key "lightningRadius";
    lightningsubdiv: i32 = 0 => "lightningsubdiv", key "lightningSubDiv";
    lightningscale: f32 = 0.0 => "lightningscale", key "lightningScale";
    lightningzigzag: i32 = 0 => "lightningzigzag", key "lightningzigzag";
    percentstart: f32 = 0.0 => "percentstart", key "percentStart";
    percentmid: f32 = 0.0 => "percentmid", key "percentMid";
    percentend: f32 = 0.0 => "percentend", key "percentEnd";
    targetsize: i32 = 0 => "targetsize", key "targetsize";
    numcontrolpts: i32 = 0 => "numcontrolpts", key "numcontrolpts";
    controlptradius: f32 = 0.0 => "controlptradius", key "controlptradius";
    controlptdelay: i32 = 0 => "controlptdelay", key "controlptdelay";
    tangentspread: i32 = 0 => "tangentspread", key "tangentspread";
    tangentlength: f32 = 0.0 => "tangentlength", key "tangentlength";
    colorstart: Vec3d = Vec3d::ONE => "colorstart", key "colorStart";
    colormid: Vec3d = Vec3d::ONE => "colormid", key "colorMid";
    colorend: Vec3d = Vec3d::ONE => "colorend", key "colorEnd";
}

static PARAMS_BY_NAME: Lazy<HashMap<String, &'static EmitterParam>> =
    Lazy::new(|| EMITTER_PARAMS.iter().map(|param| (param.name.to_ascii_lowercase(), param)).collect());

/// Case-insensitive lookup of a geometry directive or controller name.
pub fn emitter_param(name: &str) -> Option<&'static EmitterParam> {
    PARAMS_BY_NAME.get(&name.to_ascii_lowercase()).copied()
}

/// Case-insensitive lookup restricted to animatable parameters.
pub fn emitter_controller(name: &str) -> Option<&'static EmitterParam> {
    emitter_param(name).filter(|param| param.controller.is_some())
}

impl Emitter {
    /// Applies one directive. `Ok(false)` means the name is not an emitter parameter.
    pub fn read_param(&mut self, name: &str, tokens: &[&str]) -> Result<bool, String> {
        match emitter_param(name) {
            Some(param) => (param.read)(self, tokens).map(|()| true),
            None => Ok(false),
        }
    }

    /// `(name, value)` pairs in export order; parameters that are unset are skipped.
    pub fn params(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        EMITTER_PARAMS.iter().filter_map(move |param| (param.write)(self).map(|value| (param.name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_unique() {
        assert_eq!(PARAMS_BY_NAME.len(), EMITTER_PARAMS.len());
    }

    #[test]
    fn test_integer_conversion_table() {
        for name in ["birthrate", "m_fRandomBirthRate", "fps", "frameEnd", "xsize", "lightningSubDiv", "tangentspread"] {
            let param = emitter_controller(name).unwrap();
            assert!(param.integer, "{}", name);
        }
        for name in ["alphaStart", "lifeExp", "sizeEnd_y", "lightningScale"] {
            assert!(!emitter_controller(name).unwrap().integer, "{}", name);
        }
        assert_eq!(emitter_controller("colorMid").unwrap().arity, 3);
        assert!(emitter_controller("texture").is_none());
    }

    #[test]
    fn test_read_is_case_insensitive() {
        let mut emitter = Emitter::default();
        assert_eq!(emitter.read_param("BirthRate", &["12.0"]), Ok(true));
        assert_eq!(emitter.read_param("colorstart", &["0.5", "0.25", "1"]), Ok(true));
        assert_eq!(emitter.read_param("CHUNKNAME", &["rock01"]), Ok(true));
        assert_eq!(emitter.read_param("not_a_param", &["1"]), Ok(false));
        assert!(emitter.read_param("grav", &["heavy"]).is_err());
        assert_eq!(emitter.birthrate, 12);
        assert_eq!(emitter.colorstart, Vec3d::new(0.5, 0.25, 1.0));
        assert_eq!(emitter.chunk_name, "rock01");
    }

    #[test]
    fn test_enums_keep_unrecognized_spellings() {
        let mut emitter = Emitter::default();
        emitter.read_param("blend", &["punchthrough"]).unwrap();
        emitter.read_param("update", &["Wobble"]).unwrap();
        emitter.read_param("spawntype", &["1"]).unwrap();
        assert_eq!(emitter.blend, Some(BlendType::PunchThrough));
        assert_eq!(emitter.update, Some(UpdateType::Unrecognized("Wobble".to_owned())));
        assert_eq!(emitter.spawntype, Some(SpawnType::Trail));

        let params: HashMap<_, _> = emitter.params().collect();
        assert_eq!(params["blend"], "Punch-Through");
        assert_eq!(params["update"], "Wobble");
        assert_eq!(params["spawntype"], "1");
        assert!(!params.contains_key("render"));
        assert!(!params.contains_key("texture"));
    }

    #[test]
    fn test_explicit_none_texture_is_kept() {
        let mut emitter = Emitter::default();
        emitter.read_param("texture", &["NONE"]).unwrap();
        let params: HashMap<_, _> = emitter.params().collect();
        assert_eq!(params["texture"], "NONE");
        assert!(!params.contains_key("chunkName"));
    }

    #[test]
    fn test_defaults_and_export_order() {
        let emitter = Emitter::default();
        let params: Vec<_> = emitter.params().collect();
        assert_eq!(params[0], ("deadspace", "0".to_owned()));
        assert!(params.contains(&("xsize", "2".to_owned())));
        assert!(params.contains(&("colorend", "1 1 1".to_owned())));
        assert!(params.contains(&("loop", "0".to_owned())));
    }
}
