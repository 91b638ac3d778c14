//! Walkmesh bounding volume hierarchy, room links and layout offsets.

use crate::anim::round_to;
use crate::types::{AabbEntry, BBox, Face, Mesh, RoomLink, Vec3d, NON_WALKABLE};

/// Highest room index a corner tag may carry.
pub const MAX_ROOM: i32 = 54;

struct Item {
    face: usize,
    bbox: BBox,
    centroid: Vec3d,
}

/// Builds the pre-order AABB tree over `faces`.
///
/// Each set is split at the median centroid along the longest axis of its box, ties broken by
/// face index, until every set holds a single triangle. Internal entries carry face `-1` and
/// their split axis; leaves carry their face index.
pub fn build_tree(verts: &[Vec3d], faces: &[Face]) -> Vec<AabbEntry> {
    let mut items: Vec<Item> = faces
        .iter()
        .enumerate()
        .map(|(face, tri)| {
            let corners = tri.verts.map(|idx| verts.get(idx as usize).copied().unwrap_or_default());
            Item { face, bbox: BBox::from_vectors(corners.into_iter()), centroid: Vec3d::average(corners.into_iter()) }
        })
        .collect();

    let mut out = Vec::with_capacity(2 * items.len());
    if !items.is_empty() {
        build_recursive(&mut items, &mut out);
    }
    out
}

fn build_recursive(items: &mut [Item], out: &mut Vec<AabbEntry>) {
    let bbox = BBox::from_bboxes(items.iter().map(|item| &item.bbox));
    if let [item] = items {
        out.push(AabbEntry { bbox, face: item.face as i32, split: None });
        return;
    }

    let axis = bbox.greatest_dimension();
    items.sort_by(|a, b| a.centroid[axis].total_cmp(&b.centroid[axis]).then(a.face.cmp(&b.face)));
    out.push(AabbEntry { bbox, face: -1, split: Some(axis) });

    let (left, right) = items.split_at_mut(items.len() / 2);
    build_recursive(left, out);
    build_recursive(right, out);
}

fn room_of(tag: i32) -> Option<u32> {
    (0..=MAX_ROOM).contains(&tag).then(|| tag as u32)
}

/// Derives room links from per-corner room tags.
///
/// Edge `i` of a face runs from corner `i` to corner `i + 1`. Non-walkable faces are not
/// counted, so face indices in the result are contiguous over walkable faces.
pub fn room_links(faces: &[Face], corner_tags: &[[i32; 3]]) -> Vec<RoomLink> {
    let mut links = vec![];
    let walkable = faces.iter().zip(corner_tags).filter(|(face, _)| face.material != NON_WALKABLE);
    for (walk_idx, (_, tags)) in walkable.enumerate() {
        for edge in 0..3 {
            let (a, b) = (room_of(tags[edge]), room_of(tags[(edge + 1) % 3]));
            if let (Some(room), Some(other)) = (a, b) {
                if room == other {
                    links.push(RoomLink { face_edge: (3 * walk_idx + edge) as u32, room });
                }
            }
        }
    }
    links
}

/// The inverse of [`room_links`]: per-corner tags, `-1` where a corner has no room.
pub fn corner_tags(faces: &[Face], links: &[RoomLink]) -> Vec<[i32; 3]> {
    let walkable: Vec<usize> = faces.iter().enumerate().filter(|(_, face)| face.material != NON_WALKABLE).map(|(idx, _)| idx).collect();
    let mut tags = vec![[-1; 3]; faces.len()];
    for link in links {
        let (walk_idx, edge) = (link.face_edge as usize / 3, link.face_edge as usize % 3);
        match walkable.get(walk_idx) {
            Some(&face) => {
                tags[face][edge] = link.room as i32;
                tags[face][(edge + 1) % 3] = link.room as i32;
            }
            None => log::warn!("room link {} points past the last walkable face", link.face_edge),
        }
    }
    tags
}

fn first_walkable_vert(mesh: &Mesh) -> Option<Vec3d> {
    let face = mesh.faces.iter().find(|face| face.material != NON_WALKABLE)?;
    mesh.verts.get(face.verts[0] as usize).copied()
}

/// Offset between a static walkmesh and the model's aabb mesh, from the first walkable face of
/// each. Walkmesh vertices are stored relative to `walkmesh_position`.
pub fn layout_position(walkmesh: &Mesh, walkmesh_position: Vec3d, aabb: &Mesh) -> Option<Vec3d> {
    let placed = first_walkable_vert(walkmesh)? - walkmesh_position;
    let local = first_walkable_vert(aabb)?;
    let offset = placed - local;
    Some(Vec3d::new(round_to(offset.x, 6), round_to(offset.y, 6), round_to(offset.z, 6)))
}
