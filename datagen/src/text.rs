//! word lists and text helpers for generated columns

use rand::{rngs::StdRng, seq::SliceRandom, Rng};

/// nation name and region key, in key order
pub const NATIONS: [(&str, i64); 25] = [
    ("ALGERIA", 0),
    ("ARGENTINA", 1),
    ("BRAZIL", 1),
    ("CANADA", 1),
    ("EGYPT", 4),
    ("ETHIOPIA", 0),
    ("FRANCE", 3),
    ("GERMANY", 3),
    ("INDIA", 2),
    ("INDONESIA", 2),
    ("IRAN", 4),
    ("IRAQ", 4),
    ("JAPAN", 2),
    ("JORDAN", 4),
    ("KENYA", 0),
    ("MOROCCO", 0),
    ("MOZAMBIQUE", 0),
    ("PERU", 1),
    ("CHINA", 2),
    ("ROMANIA", 3),
    ("SAUDI ARABIA", 4),
    ("VIETNAM", 2),
    ("RUSSIA", 3),
    ("UNITED KINGDOM", 3),
    ("UNITED STATES", 1),
];

pub const COLORS: &[&str] = &[
    "almond", "antique", "aquamarine", "azure", "beige", "bisque", "black", "blanched", "blue",
    "blush", "brown", "burlywood", "burnished", "chartreuse", "chiffon", "chocolate", "coral",
    "cornflower", "cornsilk", "cream", "cyan", "dark", "deep", "dim", "dodger", "drab",
    "firebrick", "floral", "forest", "frosted", "gainsboro", "ghost", "goldenrod", "green",
    "grey", "honeydew", "hot", "indian", "ivory", "khaki", "lace", "lavender", "lawn", "lemon",
    "light", "lime", "linen", "magenta", "maroon", "medium", "metallic", "midnight", "mint",
    "misty", "moccasin", "navajo", "navy", "olive", "orange", "orchid", "pale", "papaya",
    "peach", "peru", "pink", "plum", "powder", "puff", "purple", "red", "rose", "rosy", "royal",
    "saddle", "salmon", "sandy", "seashell", "sienna", "sky", "slate", "smoke", "snow",
    "spring", "steel", "tan", "thistle", "tomato", "turquoise", "violet", "wheat", "white",
    "yellow",
];

pub const TYPE_SIZES: &[&str] = &["STANDARD", "SMALL", "MEDIUM", "LARGE", "ECONOMY", "PROMO"];
pub const TYPE_FINISHES: &[&str] = &["ANODIZED", "BURNISHED", "PLATED", "POLISHED", "BRUSHED"];
pub const TYPE_METALS: &[&str] = &["TIN", "NICKEL", "BRASS", "STEEL", "COPPER"];

pub const CONTAINER_SIZES: &[&str] = &["SM", "LG", "MED", "JUMBO", "WRAP"];
pub const CONTAINER_KINDS: &[&str] = &["CASE", "BOX", "BAG", "JAR", "PKG", "PACK", "CAN", "DRUM"];

const COMMENT_WORDS: &[&str] = &[
    "furiously", "special", "requests", "carefully", "final", "deposits", "packages",
    "accounts", "ironic", "pending", "blithely", "quickly", "regular", "express", "slyly",
    "bold", "theodolites", "instructions", "foxes", "platelets", "pinto", "beans", "even",
    "unusual", "courts", "above", "the", "sleep", "haggle", "nag", "wake", "among", "Customer",
    "Complaints",
];

const ADDRESS_CHARACTERS: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ,. ";

pub fn pick<'a>(rng: &mut StdRng, values: &[&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}

/// words from the comment vocabulary, never longer than `max` characters
pub fn comment(rng: &mut StdRng, max: usize) -> String {
    let target = rng.gen_range(max / 3..=max);
    let mut text = String::with_capacity(target);

    loop {
        let word = pick(rng, COMMENT_WORDS);
        let needed = if text.is_empty() { word.len() } else { word.len() + 1 };

        if text.len() + needed > target {
            break;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(word);
    }

    text
}

pub fn address(rng: &mut StdRng, min: usize, max: usize) -> String {
    let length = rng.gen_range(min..=max);

    (0..length)
        .map(|_| char::from(ADDRESS_CHARACTERS[rng.gen_range(0..ADDRESS_CHARACTERS.len())]))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// phone number with the country code derived from the nation, always 15 characters
pub fn phone(rng: &mut StdRng, nation: i64) -> String {
    format!(
        "{}-{}-{}-{}",
        nation + 10,
        rng.gen_range(100..=999),
        rng.gen_range(100..=999),
        rng.gen_range(1000..=9999)
    )
}

/// five distinct color words
pub fn part_name(rng: &mut StdRng) -> String {
    COLORS
        .choose_multiple(rng, 5)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
