//! SessionId generation: 8 lowercase hex chars, regenerate on collision.

use rand::Rng;

pub type SessionId = String;

const ID_LEN: usize = 8;

/// Draw a fresh 8 lowercase-hex-char id. Callers that insert into a registry
/// are responsible for retrying on the astronomically rare collision.
pub fn generate_session_id() -> SessionId {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_eight_lowercase_hex_chars() {
        for _ in 0..100 {
            let id = generate_session_id();
            assert_eq!(id.len(), ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
