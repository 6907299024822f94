use rand::RngCore;
use std::collections::HashSet;

pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut data = [0u8; N];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

pub fn repeating_block(arr: &[u8], size: usize) -> Option<Vec<u8>> {
    let mut blocks: HashSet<&[u8]> = HashSet::new();
    for block in arr.chunks(size) {
        if blocks.contains(block) {
            return Some(block.to_vec());
        }
        blocks.insert(block);
    }
    None
}

#[test]
fn test_repeating_block() {
    let arr = b"aaabbbcccaaa";
    assert_eq!(Some(b"aaa".to_vec()), repeating_block(arr, 3));
    assert_eq!(None,                  repeating_block(arr, 4));
}
