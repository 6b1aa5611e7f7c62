//! Marching cubes case table.
//!
//! Corner `i` sits at offset [`CORNERS`]`[i]` in voxel units and edge `e`
//! joins the corner pair [`EDGES`]`[e]`. A case index has bit `i` set when
//! corner `i` lies behind the surface (negative distance).
//!
//! Triangles are generated rather than transcribed: every cube face is
//! walked counter-clockwise as seen from outside the cube, each run of
//! negative corners contributes one directed segment from the edge where
//! the walk enters the run to the edge where it leaves, and the segments
//! close into loops that are fan-triangulated. On ambiguous faces every
//! negative corner is isolated, so neighbouring cubes always agree on the
//! shared face and the surface is closed. Triangles wind counter-clockwise
//! when seen from the positive (free space) side.

use std::sync::LazyLock;

pub const CORNERS: [[u32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

pub const EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Cube faces, corners counter-clockwise when viewed from outside.
const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [3, 7, 6, 2],
    [0, 4, 7, 3],
    [1, 2, 6, 5],
];

/// Triangles (as edge triples) for each of the 256 cases.
pub static TRIANGLES: LazyLock<Vec<Vec<[u8; 3]>>> =
    LazyLock::new(|| (0..256).map(|case| triangulate(case as u8)).collect());

/// Bit `e` set when edge `e` crosses the surface.
pub fn edge_mask(case: u8) -> u16 {
    EDGES
        .iter()
        .enumerate()
        .filter(|(_, [a, b])| is_inside(case, *a) != is_inside(case, *b))
        .fold(0, |mask, (e, _)| mask | (1 << e))
}

#[inline]
fn is_inside(case: u8, corner: usize) -> bool {
    case & (1 << corner) != 0
}

fn edge_between(a: usize, b: usize) -> usize {
    EDGES
        .iter()
        .position(|&[p, q]| (p == a && q == b) || (p == b && q == a))
        .unwrap_or_else(|| unreachable!("corners {a} and {b} are not adjacent"))
}

fn triangulate(case: u8) -> Vec<[u8; 3]> {
    let mut next: [Option<usize>; 12] = [None; 12];

    for face in &FACES {
        // Start the walk on an outside corner so every negative run is whole.
        let Some(start) = (0..4).find(|&i| !is_inside(case, face[i])) else {
            continue;
        };
        let mut entry = None;
        for step in 0..4 {
            let a = face[(start + step) % 4];
            let b = face[(start + step + 1) % 4];
            match (is_inside(case, a), is_inside(case, b)) {
                (false, true) => entry = Some(edge_between(a, b)),
                (true, false) => {
                    if let Some(from) = entry.take() {
                        next[from] = Some(edge_between(a, b));
                    }
                }
                _ => {}
            }
        }
    }

    let mut triangles = Vec::new();
    let mut visited = [false; 12];
    for first in 0..12 {
        if visited[first] || next[first].is_none() {
            continue;
        }
        let mut polygon = Vec::new();
        let mut edge = first;
        while !visited[edge] {
            visited[edge] = true;
            polygon.push(edge as u8);
            match next[edge] {
                Some(n) => edge = n,
                None => break,
            }
        }
        for i in 1..polygon.len().saturating_sub(1) {
            triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
        }
    }
    triangles
}
