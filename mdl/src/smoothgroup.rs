//! Smoothgroup bitmasks and the sharp edges they imply.

use std::collections::{BTreeSet, HashMap};

use crate::types::Face;

/// An undirected edge as an ordered vertex pair.
pub type Edge = (u32, u32);

pub fn edge(a: u32, b: u32) -> Edge {
    (a.min(b), a.max(b))
}

fn face_edges(face: &Face) -> [Edge; 3] {
    let [a, b, c] = face.verts;
    [edge(a, b), edge(b, c), edge(c, a)]
}

/// Faces may shade smoothly across a shared edge only when their masks share a bit.
pub fn is_sharp(a: u32, b: u32) -> bool {
    a & b == 0
}

/// How new masks are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// No bits at all, so every edge is hard.
    Separate,
    /// Bit 0 everywhere.
    Single,
    /// One bit per smoothly connected region, neighboring regions differing.
    Auto,
}

/// Which faces receive new masks. Faces outside the scope keep theirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Faces whose mask is still 0.
    Unassigned,
    /// Flags parallel to the face list.
    Selected(Vec<bool>),
}
impl Scope {
    fn contains(&self, idx: usize, face: &Face) -> bool {
        match self {
            Scope::All => true,
            Scope::Unassigned => face.smoothgroup == 0,
            Scope::Selected(flags) => flags.get(idx).copied().unwrap_or(false),
        }
    }
}

/// Faces touching each edge.
fn adjacency(faces: &[Face]) -> HashMap<Edge, Vec<usize>> {
    let mut map: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (idx, face) in faces.iter().enumerate() {
        for edge in face_edges(face) {
            map.entry(edge).or_default().push(idx);
        }
    }
    map
}

/// Edges shared by faces whose masks have no bit in common.
pub fn sharp_edges(faces: &[Face]) -> BTreeSet<Edge> {
    adjacency(faces)
        .into_iter()
        .filter(|(_, owners)| owners.iter().enumerate().any(|(i, &a)| owners[i + 1..].iter().any(|&b| is_sharp(faces[a].smoothgroup, faces[b].smoothgroup))))
        .map(|(edge, _)| edge)
        .collect()
}

/// Assigns new masks to the faces in `scope` according to `policy`.
///
/// `sharp` holds the hard edges to preserve; it only matters for [`Policy::Auto`].
pub fn regenerate(faces: &mut [Face], sharp: &BTreeSet<Edge>, policy: Policy, scope: &Scope) {
    let targets: Vec<bool> = faces.iter().enumerate().map(|(idx, face)| scope.contains(idx, face)).collect();
    match policy {
        Policy::Separate | Policy::Single => {
            let mask = if policy == Policy::Single { 1 } else { 0 };
            for (face, _) in faces.iter_mut().zip(&targets).filter(|(_, &target)| target) {
                face.smoothgroup = mask;
            }
        }
        Policy::Auto => {
            let masks = auto_masks(faces, sharp, &targets);
            for (face, mask) in faces.iter_mut().zip(masks) {
                if let Some(mask) = mask {
                    face.smoothgroup = mask;
                }
            }
        }
    }
}

/// `(shared edge, face)` for every face touching an edge of face `idx`.
fn neighbors<'a>(faces: &'a [Face], adjacency: &'a HashMap<Edge, Vec<usize>>, idx: usize) -> impl Iterator<Item = (Edge, usize)> + 'a {
    face_edges(&faces[idx])
        .into_iter()
        .flat_map(move |edge| adjacency.get(&edge).into_iter().flatten().map(move |&other| (edge, other)))
        .filter(move |&(_, other)| other != idx)
}

/// Flood fills the targeted faces into regions bounded by sharp edges, then colors the regions
/// greedily so that regions meeting at a sharp edge never share a bit.
fn auto_masks(faces: &[Face], sharp: &BTreeSet<Edge>, targets: &[bool]) -> Vec<Option<u32>> {
    let adjacency = adjacency(faces);
    let around = |idx: usize| neighbors(faces, &adjacency, idx);

    let mut region: Vec<Option<usize>> = vec![None; faces.len()];
    let mut regions: Vec<Vec<usize>> = vec![];
    for start in 0..faces.len() {
        if !targets[start] || region[start].is_some() {
            continue;
        }
        let id = regions.len();
        let mut members = vec![];
        let mut stack = vec![start];
        region[start] = Some(id);
        while let Some(idx) = stack.pop() {
            members.push(idx);
            for (edge, other) in around(idx) {
                if targets[other] && region[other].is_none() && !sharp.contains(&edge) {
                    region[other] = Some(id);
                    stack.push(other);
                }
            }
        }
        regions.push(members);
    }

    let mut bits: Vec<u32> = vec![0; regions.len()];
    for (id, members) in regions.iter().enumerate() {
        let mut taken = 0u32;
        for &idx in members {
            for (edge, other) in around(idx) {
                if !sharp.contains(&edge) {
                    continue;
                }
                taken |= match region[other] {
                    Some(other_id) if other_id != id => bits[other_id],
                    Some(_) => 0,
                    None => faces[other].smoothgroup,
                };
            }
        }
        bits[id] = match (0..32u32).find(|bit| taken & (1 << bit) == 0) {
            Some(bit) => 1 << bit,
            None => {
                log::warn!("more than 32 neighboring smoothgroups, reusing bit 0");
                1
            }
        };
    }

    region.into_iter().map(|id| id.map(|id| bits[id])).collect()
}
