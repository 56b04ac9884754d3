//! Deterministic human-friendly display names for workers.
//!
//! A worker id is usually a MAC address, which is not evenly distributed,
//! so the id is hashed before picking an `adjective-animal` pair.

use sha2::{Digest, Sha256};

const ADJECTIVES: &[&str] = &[
    "happy", "sleepy", "grumpy", "bouncy", "fluffy", "clever", "silly", "mighty", "gentle",
    "brave", "peaceful", "witty", "jolly", "friendly", "lively", "perky", "cute", "funny",
    "quirky", "sassy", "snug", "snarky", "snazzy", "snooty", "wobbly", "zippy", "pudgy",
    "clumsy", "dizzy", "goofy", "plucky", "wiggly", "bumbling", "derpy", "peppy", "squiggly",
    "wacky", "zesty", "loopy", "fuzzy",
];

const ANIMALS: &[&str] = &[
    "panda", "otter", "penguin", "koala", "dolphin", "rabbit", "raccoon", "fox", "hedgehog",
    "squirrel", "beaver", "badger", "wombat", "lemur", "lynx", "seal", "sloth", "tiger", "zebra",
    "giraffe", "monkey", "llama", "walrus", "hippo", "meerkat", "platypus", "quokka", "narwhal",
    "capybara", "pangolin", "axolotl", "ferret",
];

/// Derive a stable `adjective-animal` name from a worker identifier.
pub fn pet_name(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());

    // First 3 bytes pick the adjective, last 3 bytes pick the animal.
    let adjective_hash = u32::from_be_bytes([0, digest[0], digest[1], digest[2]]) as usize;
    let n = digest.len();
    let animal_hash = u32::from_be_bytes([0, digest[n - 3], digest[n - 2], digest[n - 1]]) as usize;

    let adjective = ADJECTIVES[adjective_hash % ADJECTIVES.len()];
    let animal = ANIMALS[animal_hash % ANIMALS.len()];
    format!("{adjective}-{animal}")
}

/// Whether `name` has the shape of a generated pet name.
pub fn looks_like_pet_name(name: &str) -> bool {
    match name.split_once('-') {
        Some((adjective, animal)) => ADJECTIVES.contains(&adjective) && ANIMALS.contains(&animal),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_gives_same_name() {
        assert_eq!(pet_name("001a2b3c4d5e"), pet_name("001a2b3c4d5e"));
    }

    #[test]
    fn generated_name_looks_like_pet_name() {
        for id in ["001a2b3c4d5e", "bench-7", ""] {
            let name = pet_name(id);
            assert!(looks_like_pet_name(&name), "unexpected name {name}");
        }
    }

    #[test]
    fn arbitrary_names_are_not_pet_names() {
        assert!(!looks_like_pet_name("rig-01"));
        assert!(!looks_like_pet_name("otter"));
        assert!(!looks_like_pet_name("happy-otter-2"));
    }
}
