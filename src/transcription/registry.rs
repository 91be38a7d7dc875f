//! # Model Registry
//!
//! Static knowledge about Whisper checkpoints: where to download them from,
//! roughly how big they are and which languages they can transcribe.
//!
//! ## Naming:
//! - Short names ("tiny.en", "base", "large-v3") map to `openai/whisper-<name>`
//! - Names containing `/` are taken as a Hugging Face repo id verbatim
//! - Names ending in `.en` are English-only checkpoints

use serde::Serialize;

/// Well-known checkpoints: short name, approximate size in MB, description.
const KNOWN_MODELS: &[(&str, u32, &str)] = &[
    ("tiny", 39, "Fastest, basic accuracy"),
    ("tiny.en", 39, "Fastest, basic accuracy, English only"),
    ("base", 74, "Fast, good for testing"),
    ("base.en", 74, "Fast, good for testing, English only"),
    ("small", 244, "Balanced speed and accuracy"),
    ("small.en", 244, "Balanced speed and accuracy, English only"),
    ("medium", 769, "Good accuracy, handles technical vocabulary"),
    ("medium.en", 769, "Good accuracy, English only"),
    ("large-v2", 1550, "Best accuracy, slower processing"),
    ("large-v3", 1550, "Best accuracy, 128 mel bins"),
    ("large-v3-turbo", 809, "Large encoder with a pruned decoder"),
];

/// Languages Whisper was trained on, in token order (ISO 639-1, name).
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "english"),
    ("zh", "chinese"),
    ("de", "german"),
    ("es", "spanish"),
    ("ru", "russian"),
    ("ko", "korean"),
    ("fr", "french"),
    ("ja", "japanese"),
    ("pt", "portuguese"),
    ("tr", "turkish"),
    ("pl", "polish"),
    ("ca", "catalan"),
    ("nl", "dutch"),
    ("ar", "arabic"),
    ("sv", "swedish"),
    ("it", "italian"),
    ("id", "indonesian"),
    ("hi", "hindi"),
    ("fi", "finnish"),
    ("vi", "vietnamese"),
    ("he", "hebrew"),
    ("uk", "ukrainian"),
    ("el", "greek"),
    ("ms", "malay"),
    ("cs", "czech"),
    ("ro", "romanian"),
    ("da", "danish"),
    ("hu", "hungarian"),
    ("ta", "tamil"),
    ("no", "norwegian"),
    ("th", "thai"),
    ("ur", "urdu"),
    ("hr", "croatian"),
    ("bg", "bulgarian"),
    ("lt", "lithuanian"),
    ("la", "latin"),
    ("mi", "maori"),
    ("ml", "malayalam"),
    ("cy", "welsh"),
    ("sk", "slovak"),
    ("te", "telugu"),
    ("fa", "persian"),
    ("lv", "latvian"),
    ("bn", "bengali"),
    ("sr", "serbian"),
    ("az", "azerbaijani"),
    ("sl", "slovenian"),
    ("kn", "kannada"),
    ("et", "estonian"),
    ("mk", "macedonian"),
    ("br", "breton"),
    ("eu", "basque"),
    ("is", "icelandic"),
    ("hy", "armenian"),
    ("ne", "nepali"),
    ("mn", "mongolian"),
    ("bs", "bosnian"),
    ("kk", "kazakh"),
    ("sq", "albanian"),
    ("sw", "swahili"),
    ("gl", "galician"),
    ("mr", "marathi"),
    ("pa", "punjabi"),
    ("si", "sinhala"),
    ("km", "khmer"),
    ("sn", "shona"),
    ("yo", "yoruba"),
    ("so", "somali"),
    ("af", "afrikaans"),
    ("oc", "occitan"),
    ("ka", "georgian"),
    ("be", "belarusian"),
    ("tg", "tajik"),
    ("sd", "sindhi"),
    ("gu", "gujarati"),
    ("am", "amharic"),
    ("yi", "yiddish"),
    ("lo", "lao"),
    ("uz", "uzbek"),
    ("fo", "faroese"),
    ("ht", "haitian creole"),
    ("ps", "pashto"),
    ("tk", "turkmen"),
    ("nn", "nynorsk"),
    ("mt", "maltese"),
    ("sa", "sanskrit"),
    ("lb", "luxembourgish"),
    ("my", "myanmar"),
    ("bo", "tibetan"),
    ("tl", "tagalog"),
    ("mg", "malagasy"),
    ("as", "assamese"),
    ("tt", "tatar"),
    ("haw", "hawaiian"),
    ("ln", "lingala"),
    ("ha", "hausa"),
    ("ba", "bashkir"),
    ("jw", "javanese"),
    ("su", "sundanese"),
    ("yue", "cantonese"),
];

/// Catalog entry for one model name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub repo_id: String,
    pub description: String,
    pub size_mb: Option<u32>,
    pub languages: Vec<String>,
}

impl ModelDescriptor {
    /// Describe `name`, known or not.
    pub fn for_name(name: &str) -> Self {
        let known = KNOWN_MODELS.iter().find(|(known, _, _)| *known == short_name(name));
        let description = match known {
            Some((_, _, description)) => format!("Whisper {} ({})", name, description),
            None => format!("Whisper {} model", name),
        };

        Self {
            name: name.to_string(),
            repo_id: repo_id(name),
            description,
            size_mb: known.map(|(_, size, _)| *size),
            languages: supported_languages(name),
        }
    }
}

/// Hugging Face repository holding the weights for `name`.
pub fn repo_id(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("openai/whisper-{}", name)
    }
}

/// `openai/whisper-base.en` -> `base.en`
fn short_name(name: &str) -> &str {
    let tail = name.rsplit('/').next().unwrap_or(name);
    tail.strip_prefix("whisper-").unwrap_or(tail)
}

pub fn is_english_only(name: &str) -> bool {
    name.ends_with(".en")
}

/// Language codes the model can transcribe.
pub fn supported_languages(name: &str) -> Vec<String> {
    if is_english_only(name) {
        vec!["en".to_string()]
    } else {
        LANGUAGES.iter().map(|(code, _)| code.to_string()).collect()
    }
}

/// Whether `code` is one of Whisper's language codes.
pub fn is_known_language(code: &str) -> bool {
    LANGUAGES.iter().any(|(known, _)| *known == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id() {
        assert_eq!(repo_id("tiny.en"), "openai/whisper-tiny.en");
        assert_eq!(repo_id("distil-whisper/distil-small.en"), "distil-whisper/distil-small.en");
    }

    #[test]
    fn test_english_only_models_advertise_en() {
        assert_eq!(supported_languages("base.en"), vec!["en".to_string()]);
        let all = supported_languages("base");
        assert_eq!(all.len(), LANGUAGES.len());
        assert_eq!(all[0], "en");
    }

    #[test]
    fn test_descriptor_for_known_and_unknown() {
        let known = ModelDescriptor::for_name("openai/whisper-small.en");
        assert_eq!(known.size_mb, Some(244));
        assert_eq!(known.languages, vec!["en".to_string()]);

        let unknown = ModelDescriptor::for_name("my-finetune");
        assert_eq!(unknown.size_mb, None);
        assert_eq!(unknown.description, "Whisper my-finetune model");
        assert_eq!(unknown.repo_id, "openai/whisper-my-finetune");
    }

    #[test]
    fn test_language_lookup() {
        assert!(is_known_language("nl"));
        assert!(is_known_language("yue"));
        assert!(!is_known_language("xx"));
    }
}
