//! Controllers, keyframes and the conversions between file keys and frame-based curves.

use std::f32::consts::PI;

use crate::emitter::emitter_controller;
use crate::error::Warning;
use crate::lex::Line;
use crate::types::{Channel, Keyframe, NodeType, Orientation, Vec3d};

/// Scene-side frame rate.
pub const FPS: f32 = 30.0;

/// Which part of a scene object a channel animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    Object,
    Material,
    Emitter,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSpec {
    pub name: &'static str,
    pub arity: usize,
    pub integer: bool,
    pub target: ChannelTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyForm {
    /// `label v...`
    Constant,
    /// `labelkey` followed by `t v...` rows.
    Keyed,
    /// `labelbezierkey` followed by `t v... left... right...` rows.
    Bezier,
}

const OBJECT_CONTROLLERS: &[(&str, usize)] = &[
    ("position", 3),
    ("orientation", 4),
    ("scale", 1),
    ("alpha", 1),
    ("selfillumcolor", 3),
    ("color", 3),
    ("radius", 1),
];

/// Looks up a controller by canonical name for a node of the given type.
///
/// The target depends on both: `alpha` animates the material of a mesh, `color`/`radius` the
/// lamp of a light, and emitter parameters only exist on emitters.
pub fn controller(name: &str, node_type: NodeType) -> Option<ControllerSpec> {
    if let Some(&(name, arity)) = OBJECT_CONTROLLERS.iter().find(|(ctrl, _)| ctrl.eq_ignore_ascii_case(name)) {
        let target = match (name, node_type) {
            ("alpha", t) if t.is_mesh() => ChannelTarget::Material,
            ("color" | "radius", NodeType::Light) => ChannelTarget::Light,
            _ => ChannelTarget::Object,
        };
        return Some(ControllerSpec { name, arity, integer: false, target });
    }
    if node_type != NodeType::Emitter {
        return None;
    }
    let param = emitter_controller(name)?;
    Some(ControllerSpec {
        name: param.controller?,
        arity: param.arity,
        integer: param.integer,
        target: ChannelTarget::Emitter,
    })
}

/// Splits a directive label into its controller and key form.
pub fn controller_label(label: &str, node_type: NodeType) -> Option<(ControllerSpec, KeyForm)> {
    let label = label.to_ascii_lowercase();
    // "bezierkey" first, it also ends in "key"
    let forms = [("bezierkey", KeyForm::Bezier), ("key", KeyForm::Keyed)];
    for (suffix, form) in forms {
        if let Some(base) = label.strip_suffix(suffix) {
            if let Some(spec) = controller(base, node_type) {
                return Some((spec, form));
            }
        }
    }
    controller(&label, node_type).map(|spec| (spec, KeyForm::Constant))
}

/// Reads the key rows of a keyed controller. Rows of the wrong shape are skipped with a warning.
pub fn parse_key_rows(rows: &[Line], spec: &ControllerSpec, form: KeyForm, warnings: &mut Vec<Warning>) -> Vec<Keyframe> {
    let n = spec.arity;
    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed = match form {
            KeyForm::Constant | KeyForm::Keyed => row
                .float_vec(0, n + 1)
                .map(|vals| Keyframe::Linear { time: vals[0], value: vals[1..].to_vec() }),
            KeyForm::Bezier => row.float_vec(0, 3 * n + 1).map(|vals| Keyframe::Bezier {
                time: vals[0],
                value: vals[1..=n].to_vec(),
                left: vals[n + 1..=2 * n].to_vec(),
                right: vals[2 * n + 1..].to_vec(),
            }),
        };
        match parsed {
            Ok(key) => keys.push(key),
            Err(err) => warnings.push(Warning::malformed(row.number, spec.name, err)),
        }
    }
    keys
}

/// Absolute handle positions `((t, v), (t, v))` of a bezier key, placed one third of the way
/// towards each neighbor. A missing neighbor leaves that handle's time on the key itself.
pub fn bezier_handles(prev_time: Option<f32>, time: f32, next_time: Option<f32>, value: f32, left: f32, right: f32) -> ((f32, f32), (f32, f32)) {
    let left_time = prev_time.map_or(time, |prev| time - (time - prev) / 3.0);
    let right_time = next_time.map_or(time, |next| time + (next - time) / 3.0);
    ((left_time, value + left), (right_time, value + right))
}

/// Handle deltas for a key written inside a bezier list.
///
/// Bezier keys keep their own deltas. Linear keys get handles lying on their linear segments: the
/// right one a third of the way to the next key, the left one a third of the way back to a linear
/// previous key. A bezier previous key keeps the left handle flat.
pub fn key_deltas(keys: &[Keyframe], idx: usize) -> (Vec<f32>, Vec<f32>) {
    let key = &keys[idx];
    if let Keyframe::Bezier { left, right, .. } = key {
        return (left.clone(), right.clone());
    }
    let value = key.value();
    let third = |other: &Keyframe| -> Vec<f32> { other.value().iter().zip(value).map(|(o, v)| (o - v) / 3.0).collect() };
    let flat = vec![0.0; value.len()];

    let right = keys.get(idx + 1).map_or_else(|| flat.clone(), third);
    let left = match idx.checked_sub(1).map(|prev| &keys[prev]) {
        Some(prev @ Keyframe::Linear { .. }) => third(prev),
        _ => flat,
    };
    (left, right)
}

/// Shifts `angle` by whole turns into `[reference - PI, reference + PI)`.
fn wrap_near(angle: f32, reference: f32) -> f32 {
    reference + (angle - reference + PI).rem_euclid(2.0 * PI) - PI
}

fn distance(a: Vec3d, b: Vec3d) -> f32 {
    (a - b).magnitude()
}

/// Picks the euler triple equivalent to `euler` that lies closest to `previous`.
///
/// Each component is shifted by whole turns, and the flipped form `(x + PI, PI - y, z + PI)` is
/// tried as well. The first key passes through unchanged.
pub fn euler_filter(euler: Vec3d, previous: Option<Vec3d>) -> Vec3d {
    let Some(prev) = previous else {
        return euler;
    };
    let wrap = |e: Vec3d| Vec3d::new(wrap_near(e.x, prev.x), wrap_near(e.y, prev.y), wrap_near(e.z, prev.z));
    let direct = wrap(euler);
    let flipped = wrap(Vec3d::new(euler.x + PI, PI - euler.y, euler.z + PI));
    if distance(flipped, prev) < distance(direct, prev) {
        flipped
    } else {
        direct
    }
}

pub fn time_to_frame(time: f32) -> f32 {
    time * FPS
}

pub fn frame_to_time(frame: f32) -> f32 {
    round_to(frame / FPS, 5)
}

pub(crate) fn round_to(value: f32, places: i32) -> f32 {
    let scale = 10f64.powi(places);
    ((value as f64 * scale).round() / scale) as f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Bezier,
}

/// A keyframe on a frame-based curve with absolute handles.
#[derive(Debug, Clone, PartialEq)]
pub struct CurvePoint {
    pub frame: f32,
    pub value: Vec<f32>,
    pub interpolation: Interpolation,
    /// `(frame, value per axis)`, only meaningful for bezier points.
    pub handle_left: (f32, Vec<f32>),
    pub handle_right: (f32, Vec<f32>),
}

/// Scene-side animation data of one controller. Orientation curves hold XYZ euler angles.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub name: String,
    pub target: ChannelTarget,
    /// False for controllers that were written unkeyed.
    pub keyed: bool,
    pub points: Vec<CurvePoint>,
}

impl Curve {
    /// Converts file keys into a curve, offsetting every frame by `start_frame`.
    ///
    /// Orientation keys become euler points. Bezier orientation handles are the euler form of the
    /// key value shifted by its deltas.
    pub fn from_channel(channel: &Channel, target: ChannelTarget, start_frame: f32) -> Curve {
        let is_orientation = channel.name.eq_ignore_ascii_case("orientation");
        let keys = &channel.keys;
        let mut points = Vec::with_capacity(keys.len());
        let mut prev_euler = None;

        for (idx, key) in keys.iter().enumerate() {
            let frame = start_frame + time_to_frame(key.time());
            let prev_frame = idx.checked_sub(1).map(|prev| time_to_frame(keys[prev].time()));
            let next_frame = keys.get(idx + 1).map(|next| time_to_frame(next.time()));
            let ((left_frame, _), (right_frame, _)) = bezier_handles(prev_frame, time_to_frame(key.time()), next_frame, 0.0, 0.0, 0.0);
            let (left_frame, right_frame) = (start_frame + left_frame, start_frame + right_frame);

            if is_orientation {
                let euler = euler_of(key.value(), prev_euler);
                prev_euler = Some(euler);
                let value = vec![euler.x, euler.y, euler.z];
                match key {
                    Keyframe::Bezier { value: axis_angle, left, right, .. } => {
                        let shifted = |deltas: &[f32]| -> Vec<f32> {
                            axis_angle.iter().enumerate().map(|(i, val)| val + deltas.get(i).copied().unwrap_or(0.0)).collect()
                        };
                        let handle = |deltas: &[f32]| {
                            let euler = euler_of(&shifted(deltas), Some(euler));
                            vec![euler.x, euler.y, euler.z]
                        };
                        points.push(CurvePoint {
                            frame,
                            value,
                            interpolation: Interpolation::Bezier,
                            handle_left: (left_frame, handle(left)),
                            handle_right: (right_frame, handle(right)),
                        });
                    }
                    _ => points.push(CurvePoint::linear(frame, value)),
                }
                continue;
            }
            match key {
                Keyframe::Constant { value } | Keyframe::Linear { value, .. } => points.push(CurvePoint::linear(frame, value.clone())),
                Keyframe::Bezier { value, left, right, .. } => {
                    let delta = |deltas: &[f32], axis: usize| deltas.get(axis).copied().unwrap_or(0.0);
                    points.push(CurvePoint {
                        frame,
                        value: value.clone(),
                        interpolation: Interpolation::Bezier,
                        handle_left: (left_frame, value.iter().enumerate().map(|(axis, val)| val + delta(left, axis)).collect()),
                        handle_right: (right_frame, value.iter().enumerate().map(|(axis, val)| val + delta(right, axis)).collect()),
                    });
                }
            }
        }
        Curve { name: channel.name.clone(), target, keyed: !channel.is_constant(), points }
    }

    /// Converts back to file keys, with times relative to `start_frame`.
    pub fn to_channel(&self, spec: &ControllerSpec, start_frame: f32) -> Channel {
        let is_orientation = spec.name == "orientation";
        let bezier = self.points.iter().any(|point| point.interpolation == Interpolation::Bezier);
        let file_value = |vals: &[f32]| if is_orientation { axis_angle_of(vals) } else { vals.to_vec() };
        let keys = self
            .points
            .iter()
            .map(|point| {
                let value = file_value(&point.value);
                if !self.keyed {
                    return Keyframe::Constant { value };
                }
                let time = frame_to_time(point.frame - start_frame);
                match point.interpolation {
                    Interpolation::Bezier if bezier => Keyframe::Bezier {
                        time,
                        left: file_value(&point.handle_left.1).iter().zip(&value).map(|(h, v)| h - v).collect(),
                        right: file_value(&point.handle_right.1).iter().zip(&value).map(|(h, v)| h - v).collect(),
                        value,
                    },
                    _ => Keyframe::Linear { time, value },
                }
            })
            .collect();
        Channel { name: spec.name.to_owned(), arity: spec.arity, integer: spec.integer, keys }
    }
}

fn euler_of(axis_angle: &[f32], previous: Option<Vec3d>) -> Vec3d {
    let axis_angle = [0, 1, 2, 3].map(|i| axis_angle.get(i).copied().unwrap_or(0.0));
    euler_filter(Orientation::from(axis_angle).to_euler(), previous)
}

fn axis_angle_of(euler: &[f32]) -> Vec<f32> {
    let euler = Vec3d::from([0, 1, 2].map(|i| euler.get(i).copied().unwrap_or(0.0)));
    <[f32; 4]>::from(Orientation::from_euler(euler)).to_vec()
}

impl CurvePoint {
    pub fn linear(frame: f32, value: Vec<f32>) -> Self {
        CurvePoint {
            frame,
            handle_left: (frame, value.clone()),
            handle_right: (frame, value.clone()),
            value,
            interpolation: Interpolation::Linear,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::lex::tokenize;

    #[test]
    fn test_controller_routing_depends_on_node_type() {
        assert_eq!(controller("alpha", NodeType::Trimesh).unwrap().target, ChannelTarget::Material);
        assert_eq!(controller("alpha", NodeType::Dummy).unwrap().target, ChannelTarget::Object);
        assert_eq!(controller("color", NodeType::Light).unwrap().target, ChannelTarget::Light);
        assert_eq!(controller("Radius", NodeType::Light).unwrap().name, "radius");
        assert_eq!(controller("birthrate", NodeType::Emitter).unwrap().target, ChannelTarget::Emitter);
        assert!(controller("birthrate", NodeType::Trimesh).is_none());
        assert_eq!(controller("alphastart", NodeType::Emitter).unwrap().name, "alphaStart");
    }

    #[test]
    fn test_controller_label_suffixes() {
        let (spec, form) = controller_label("positionbezierkey", NodeType::Dummy).unwrap();
        assert_eq!((spec.name, form), ("position", KeyForm::Bezier));
        let (spec, form) = controller_label("OrientationKey", NodeType::Dummy).unwrap();
        assert_eq!((spec.name, form), ("orientation", KeyForm::Keyed));
        let (spec, form) = controller_label("sizeEnd_ykey", NodeType::Emitter).unwrap();
        assert_eq!((spec.name, spec.arity, form), ("sizeEnd_y", 1, KeyForm::Keyed));
        assert_eq!(controller_label("scale", NodeType::Skin).unwrap().1, KeyForm::Constant);
        assert!(controller_label("unknownkey", NodeType::Dummy).is_none());
    }

    #[test]
    fn test_parse_key_rows() {
        let lines = tokenize("0 1 2 3\n0.5 4 5\n1 7 8 9\n");
        let spec = controller("position", NodeType::Dummy).unwrap();
        let mut warnings = vec![];
        let keys = parse_key_rows(&lines, &spec, KeyForm::Keyed, &mut warnings);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1], Keyframe::Linear { time: 1.0, value: vec![7.0, 8.0, 9.0] });
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, Some(2));

        let lines = tokenize("10 5 -1 1\n");
        let spec = controller("alpha", NodeType::Dummy).unwrap();
        let keys = parse_key_rows(&lines, &spec, KeyForm::Bezier, &mut warnings);
        assert_eq!(keys[0], Keyframe::Bezier { time: 10.0, value: vec![5.0], left: vec![-1.0], right: vec![1.0] });
    }

    #[test]
    fn test_bezier_handle_reconstruction() {
        let ((lt, lv), (rt, rv)) = bezier_handles(Some(0.0), 10.0, Some(20.0), 5.0, -1.0, 1.0);
        assert_abs_diff_eq!(lt, 10.0 - 10.0 / 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(lt, 6.6667, epsilon = 1e-4);
        assert_abs_diff_eq!(rt, 13.333, epsilon = 1e-3);
        assert_eq!((lv, rv), (4.0, 6.0));
    }

    #[test]
    fn test_linear_to_bezier_to_linear_curve() {
        let channel = Channel {
            name: "alpha".to_owned(),
            arity: 1,
            integer: false,
            keys: vec![
                Keyframe::Linear { time: 0.0, value: vec![0.0] },
                Keyframe::Bezier { time: 10.0, value: vec![5.0], left: vec![-1.0], right: vec![1.0] },
                Keyframe::Linear { time: 20.0, value: vec![0.0] },
            ],
        };
        let curve = Curve::from_channel(&channel, ChannelTarget::Material, 0.0);
        let mid = &curve.points[1];
        assert_abs_diff_eq!(mid.handle_left.0 / FPS, 6.6667, epsilon = 1e-4);
        assert_abs_diff_eq!(mid.handle_right.0 / FPS, 13.3333, epsilon = 1e-4);
        assert_eq!(mid.handle_left.1, vec![4.0]);
        assert_eq!(mid.handle_right.1, vec![6.0]);

        let spec = controller("alpha", NodeType::Trimesh).unwrap();
        let back = curve.to_channel(&spec, 0.0);
        assert_eq!(back.keys, channel.keys);
    }

    #[test]
    fn test_linear_key_deltas_inside_bezier_list() {
        let keys = vec![
            Keyframe::Linear { time: 0.0, value: vec![0.0] },
            Keyframe::Linear { time: 1.0, value: vec![3.0] },
            Keyframe::Bezier { time: 2.0, value: vec![9.0], left: vec![-2.0], right: vec![0.5] },
            Keyframe::Linear { time: 3.0, value: vec![6.0] },
        ];
        assert_eq!(key_deltas(&keys, 0), (vec![0.0], vec![1.0]));
        assert_eq!(key_deltas(&keys, 1), (vec![-1.0], vec![2.0]));
        assert_eq!(key_deltas(&keys, 2), (vec![-2.0], vec![0.5]));
        // previous key is bezier: flat left handle, no next key: flat right handle
        assert_eq!(key_deltas(&keys, 3), (vec![0.0], vec![0.0]));
    }

    #[test]
    fn test_euler_filter_unwraps_turns() {
        let prev = Vec3d::new(0.0, 0.0, 3.0);
        let next = euler_filter(Vec3d::new(0.0, 0.0, -3.0), Some(prev));
        assert_abs_diff_eq!(next.z, 2.0 * PI - 3.0, epsilon = 1e-5);
        assert_eq!(euler_filter(Vec3d::new(1.0, 2.0, 3.0), None), Vec3d::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_euler_filter_prefers_flipped_form() {
        let prev = Vec3d::new(PI, 0.2, PI);
        let next = euler_filter(Vec3d::new(0.0, PI - 0.25, 0.0), Some(prev));
        assert_abs_diff_eq!(next.x, PI, epsilon = 1e-5);
        assert_abs_diff_eq!(next.y, 0.25, epsilon = 1e-5);
        assert_abs_diff_eq!(next.z, PI, epsilon = 1e-5);
    }

    #[test]
    fn test_orientation_round_trip_through_curve() {
        let channel = Channel {
            name: "orientation".to_owned(),
            arity: 4,
            integer: false,
            keys: vec![
                Keyframe::Linear { time: 0.0, value: vec![0.0, 0.0, 1.0, 0.5] },
                Keyframe::Linear { time: 0.5, value: vec![1.0, 0.0, 0.0, 1.25] },
            ],
        };
        let curve = Curve::from_channel(&channel, ChannelTarget::Object, 15.0);
        assert_eq!(curve.points[1].frame, 30.0);
        let spec = controller("orientation", NodeType::Dummy).unwrap();
        let back = curve.to_channel(&spec, 15.0);
        for (a, b) in channel.keys.iter().zip(&back.keys) {
            assert_abs_diff_eq!(a.time(), b.time(), epsilon = 1e-6);
            for (x, y) in a.value().iter().zip(b.value()) {
                assert_abs_diff_eq!(x, y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_orientation_bezier_keeps_its_handles() {
        let channel = Channel {
            name: "orientation".to_owned(),
            arity: 4,
            integer: false,
            keys: vec![
                Keyframe::Linear { time: 0.0, value: vec![0.0, 0.0, 1.0, 0.25] },
                Keyframe::Bezier { time: 1.0, value: vec![0.0, 0.0, 1.0, 0.5], left: vec![0.0, 0.0, 0.0, -0.1], right: vec![0.0, 0.0, 0.0, 0.2] },
            ],
        };
        let curve = Curve::from_channel(&channel, ChannelTarget::Object, 0.0);
        let point = &curve.points[1];
        assert_eq!(point.interpolation, Interpolation::Bezier);
        assert_abs_diff_eq!(point.handle_left.1[2], 0.4, epsilon = 1e-5);
        assert_abs_diff_eq!(point.handle_right.1[2], 0.7, epsilon = 1e-5);

        let spec = controller("orientation", NodeType::Dummy).unwrap();
        let back = curve.to_channel(&spec, 0.0);
        let Keyframe::Bezier { value, left, right, .. } = &back.keys[1] else {
            panic!("orientation key lost its bezier form: {:?}", back.keys[1]);
        };
        for (got, want) in value.iter().zip([0.0, 0.0, 1.0, 0.5]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(left[3], -0.1, epsilon = 1e-5);
        assert_abs_diff_eq!(right[3], 0.2, epsilon = 1e-5);
        assert!(matches!(back.keys[0], Keyframe::Linear { .. }));
    }

    #[test]
    fn test_frame_time_conversion() {
        assert_eq!(time_to_frame(0.5), 15.0);
        assert_abs_diff_eq!(frame_to_time(1.0), 0.03333, epsilon = 1e-7);
        assert_eq!(frame_to_time(45.0), 1.5);
    }
}
