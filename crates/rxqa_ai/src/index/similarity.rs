pub fn l2_norm(v: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for x in v {
        sum += x * x;
    }
    sum.sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    let mut dot = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
    }
    dot / (a_norm * b_norm)
}

/// Cosine distance in [0, 2]; a zero vector is treated as orthogonal.
pub fn cosine_distance(query: &[f32], query_norm: f32, v: &[f32]) -> f32 {
    let v_norm = l2_norm(v);
    if v_norm == 0.0 || query_norm == 0.0 {
        return 1.0;
    }
    1.0 - cosine_similarity(query, v, query_norm, v_norm).clamp(-1.0, 1.0)
}

/// Little-endian f32 packing used for the `embedding` column.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
