//! Subdivided icosahedron: the planet's tile graph.
//!
//! Tile centers are the vertices of a subdivided icosahedron projected onto
//! the unit sphere. Each subdivision splits every edge once, so vertex
//! counts follow 10 * 4^n + 2. The twelve original vertices keep five
//! neighbors (the pentagons); every other tile has six.
//!
//! Construction is fully deterministic: midpoint vertices are deduplicated
//! through an exact edge cache, never by float comparison.

use hashbrown::HashMap;

/// Tile graph of the subdivided icosahedron
#[derive(Debug, Clone)]
pub struct IcoSphere {
    /// Unit-sphere tile centers
    pub vertices: Vec<[f64; 3]>,
    /// Sorted neighbor lists per tile
    pub neighbors: Vec<Vec<u32>>,
}

/// Vertices produced by `subdivision` rounds
pub fn vertex_count(subdivision: u32) -> usize {
    10 * 4usize.pow(subdivision) + 2
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / len, v[1] / len, v[2] / len]
}

/// Build the tile graph at the given subdivision count
pub fn build(subdivision: u32) -> IcoSphere {
    let t = (1.0 + 5.0f64.sqrt()) / 2.0;

    let mut vertices: Vec<[f64; 3]> = vec![
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .into_iter()
    .map(normalize)
    .collect();

    let mut faces: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivision {
        let mut midpoint_cache: HashMap<(u32, u32), u32> = HashMap::new();
        let mut next_faces = Vec::with_capacity(faces.len() * 4);

        let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<[f64; 3]>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoint_cache.entry(key).or_insert_with(|| {
                let va = vertices[a as usize];
                let vb = vertices[b as usize];
                let mid = normalize([
                    (va[0] + vb[0]) / 2.0,
                    (va[1] + vb[1]) / 2.0,
                    (va[2] + vb[2]) / 2.0,
                ]);
                vertices.push(mid);
                (vertices.len() - 1) as u32
            })
        };

        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next_faces.push([a, ab, ca]);
            next_faces.push([b, bc, ab]);
            next_faces.push([c, ca, bc]);
            next_faces.push([ab, bc, ca]);
        }
        faces = next_faces;
    }

    // Adjacency from face edges
    let mut neighbor_sets: Vec<Vec<u32>> = vec![Vec::with_capacity(6); vertices.len()];
    let mut add_edge = |sets: &mut Vec<Vec<u32>>, a: u32, b: u32| {
        if !sets[a as usize].contains(&b) {
            sets[a as usize].push(b);
        }
    };
    for &[a, b, c] in &faces {
        add_edge(&mut neighbor_sets, a, b);
        add_edge(&mut neighbor_sets, b, a);
        add_edge(&mut neighbor_sets, b, c);
        add_edge(&mut neighbor_sets, c, b);
        add_edge(&mut neighbor_sets, c, a);
        add_edge(&mut neighbor_sets, a, c);
    }
    for set in &mut neighbor_sets {
        set.sort_unstable();
    }

    IcoSphere {
        vertices,
        neighbors: neighbor_sets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_counts() {
        assert_eq!(vertex_count(0), 12);
        assert_eq!(vertex_count(1), 42);
        assert_eq!(vertex_count(2), 162);
        assert_eq!(vertex_count(3), 642);
        assert_eq!(vertex_count(4), 2562);
    }

    #[test]
    fn test_build_matches_formula() {
        for sub in 0..4 {
            let sphere = build(sub);
            assert_eq!(sphere.vertices.len(), vertex_count(sub));
            assert_eq!(sphere.neighbors.len(), sphere.vertices.len());
        }
    }

    #[test]
    fn test_exactly_twelve_pentagons() {
        let sphere = build(3);
        let pentagons = sphere.neighbors.iter().filter(|n| n.len() == 5).count();
        let hexagons = sphere.neighbors.iter().filter(|n| n.len() == 6).count();
        assert_eq!(pentagons, 12);
        assert_eq!(pentagons + hexagons, sphere.vertices.len());
    }

    #[test]
    fn test_vertices_on_unit_sphere() {
        let sphere = build(2);
        for v in &sphere.vertices {
            let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_adjacency_symmetric() {
        let sphere = build(2);
        for (i, neighbors) in sphere.neighbors.iter().enumerate() {
            for &n in neighbors {
                assert!(
                    sphere.neighbors[n as usize].contains(&(i as u32)),
                    "edge {}->{} not symmetric",
                    i,
                    n
                );
            }
        }
    }

    #[test]
    fn test_graph_connected() {
        let sphere = build(2);
        let mut seen = vec![false; sphere.vertices.len()];
        let mut queue = vec![0u32];
        seen[0] = true;
        while let Some(v) = queue.pop() {
            for &n in &sphere.neighbors[v as usize] {
                if !seen[n as usize] {
                    seen[n as usize] = true;
                    queue.push(n);
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_deterministic_construction() {
        let a = build(3);
        let b = build(3);
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(a.neighbors, b.neighbors);
    }
}
