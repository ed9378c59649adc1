//! Class labels of the pretrained models.
//!
use std::path::Path;

use anyhow::{Context, Result};

/// COCO category names indexed by the category id emitted by SSD-MobileNet.
///
/// Ids without a category in the 2017 release are `None`.
pub const COCO_LABELS: [Option<&str>; 91] = [
    None,
    Some("person"),
    Some("bicycle"),
    Some("car"),
    Some("motorcycle"),
    Some("airplane"),
    Some("bus"),
    Some("train"),
    Some("truck"),
    Some("boat"),
    Some("traffic light"),
    Some("fire hydrant"),
    None,
    Some("stop sign"),
    Some("parking meter"),
    Some("bench"),
    Some("bird"),
    Some("cat"),
    Some("dog"),
    Some("horse"),
    Some("sheep"),
    Some("cow"),
    Some("elephant"),
    Some("bear"),
    Some("zebra"),
    Some("giraffe"),
    None,
    Some("backpack"),
    Some("umbrella"),
    None,
    None,
    Some("handbag"),
    Some("tie"),
    Some("suitcase"),
    Some("frisbee"),
    Some("skis"),
    Some("snowboard"),
    Some("sports ball"),
    Some("kite"),
    Some("baseball bat"),
    Some("baseball glove"),
    Some("skateboard"),
    Some("surfboard"),
    Some("tennis racket"),
    Some("bottle"),
    None,
    Some("wine glass"),
    Some("cup"),
    Some("fork"),
    Some("knife"),
    Some("spoon"),
    Some("bowl"),
    Some("banana"),
    Some("apple"),
    Some("sandwich"),
    Some("orange"),
    Some("broccoli"),
    Some("carrot"),
    Some("hot dog"),
    Some("pizza"),
    Some("donut"),
    Some("cake"),
    Some("chair"),
    Some("couch"),
    Some("potted plant"),
    Some("bed"),
    None,
    Some("dining table"),
    None,
    None,
    Some("toilet"),
    None,
    Some("tv"),
    Some("laptop"),
    Some("mouse"),
    Some("remote"),
    Some("keyboard"),
    Some("cell phone"),
    Some("microwave"),
    Some("oven"),
    Some("toaster"),
    Some("sink"),
    Some("refrigerator"),
    None,
    Some("book"),
    Some("clock"),
    Some("vase"),
    Some("scissors"),
    Some("teddy bear"),
    Some("hair drier"),
    Some("toothbrush"),
];

/// Look up the COCO category name of a class id.
pub fn coco_label(class_id: usize) -> Option<&'static str> {
    COCO_LABELS.get(class_id).copied().flatten()
}

/// Parse a label file with one class per line.
///
/// Lines in synset format (`n01440764 tench, Tinca tinca`) are stripped of their WordNet id.
pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((id, name)) if is_wordnet_id(id) => name.trim().to_owned(),
            _ => line.to_owned(),
        })
        .collect()
}

pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels from {}", path.display()))?;
    Ok(parse_labels(&text))
}

fn is_wordnet_id(word: &str) -> bool {
    word.len() == 9 && word.starts_with('n') && word[1..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn coco_ids_map_to_names() {
        assert_eq!(coco_label(1), Some("person"));
        assert_eq!(coco_label(17), Some("cat"));
        assert_eq!(coco_label(90), Some("toothbrush"));
        assert_eq!(coco_label(12), None);
        assert_eq!(coco_label(0), None);
        assert_eq!(coco_label(91), None);
        assert_eq!(COCO_LABELS.iter().flatten().count(), 80);
    }

    #[test]
    fn synset_ids_are_stripped() {
        let labels = parse_labels("n01440764 tench, Tinca tinca\nn01443537 goldfish\n\nplain label\n");
        assert_eq!(labels, ["tench, Tinca tinca", "goldfish", "plain label"]);
    }
}
