//! Identity name normalization.
//!
//! Identities are keyed by an ASCII slug derived from the display name:
//! lowercase, accents folded to their base letter, everything outside
//! `a-z0-9` dropped. Folding covers Latin-1, Latin Extended-A and the
//! Vietnamese tone-marked vowels.

/// Fold `name` into its slug. May return an empty string when the name
/// contains no foldable characters.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' => slug.push(c),
            _ => {
                if let Some(base) = fold_latin(c) {
                    slug.push(base);
                }
            }
        }
    }
    slug
}

/// Map a lowercase accented Latin letter to its ASCII base letter.
///
/// Ranges over the extended blocks are safe here: the interleaved
/// uppercase codepoints never reach this function because the caller
/// lowercases first.
fn fold_latin(c: char) -> Option<char> {
    let base = match c {
        // Latin-1 supplement
        'à'..='å' | 'æ' => 'a',
        'ç' => 'c',
        'è'..='ë' => 'e',
        'ì'..='ï' => 'i',
        'ð' => 'd',
        'ñ' => 'n',
        'ò'..='ö' | 'ø' => 'o',
        'ù'..='ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ß' => 's',
        // Latin Extended-A
        'ā'..='ą' => 'a',
        'ć'..='č' => 'c',
        'ď'..='đ' => 'd',
        'ē'..='ě' => 'e',
        'ĝ'..='ģ' => 'g',
        'ĥ'..='ħ' => 'h',
        'ĩ'..='ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ'..='ł' => 'l',
        'ń'..='ŋ' => 'n',
        'ō'..='ő' | 'œ' | 'ơ' => 'o',
        'ŕ'..='ř' => 'r',
        'ś'..='š' => 's',
        'ţ'..='ŧ' => 't',
        'ũ'..='ų' | 'ư' => 'u',
        'ŵ' => 'w',
        'ŷ' => 'y',
        'ź'..='ž' => 'z',
        // Vietnamese tone-marked vowels (Latin Extended Additional)
        'ạ'..='ặ' => 'a',
        'ẹ'..='ệ' => 'e',
        'ỉ' | 'ị' => 'i',
        'ọ'..='ợ' => 'o',
        'ụ'..='ự' => 'u',
        'ỳ'..='ỹ' => 'y',
        _ => return None,
    };
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii() {
        assert_eq!(slugify("Ana"), "ana");
        assert_eq!(slugify("MIXED Case-99"), "mixedcase99");
    }

    #[test]
    fn test_vietnamese_names() {
        assert_eq!(slugify("Việt Anh"), "vietanh");
        assert_eq!(slugify("Nguyễn Văn A"), "nguyenvana");
        assert_eq!(slugify("Trương"), "truong");
    }

    #[test]
    fn test_latin_accents() {
        assert_eq!(slugify("José Müller"), "josemuller");
        assert_eq!(slugify("Łukasz"), "lukasz");
    }

    #[test]
    fn test_digits_survive() {
        assert_eq!(slugify("Việt Anh 2"), "vietanh2");
    }

    #[test]
    fn test_unfoldable_input_is_empty() {
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("日本語"), "");
        assert_eq!(slugify(""), "");
    }
}
