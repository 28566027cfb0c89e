use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};
use unic_langid::LanguageIdentifier;

/// Localized user-facing messages backed by Fluent bundles (thread-safe)
pub struct I18n {
    bundles: RwLock<HashMap<String, FluentBundle<FluentResource>>>,
    default_locale: String,
}

impl I18n {
    /// Create a new i18n service with embedded English messages
    pub fn new() -> Self {
        let i18n = Self {
            bundles: RwLock::new(HashMap::new()),
            default_locale: "en".to_string(),
        };

        i18n.load_embedded_en();

        i18n
    }

    /// Add a locale with translations
    pub fn add_locale(&self, locale: &str, content: &str) -> Result<(), String> {
        let lang_id: LanguageIdentifier = locale
            .parse()
            .map_err(|e| format!("Invalid locale '{}': {}", locale, e))?;

        let resource = FluentResource::try_new(content.to_string())
            .map_err(|(_, errors)| format!("Failed to parse Fluent resource: {:?}", errors))?;

        let mut bundle = FluentBundle::new_concurrent(vec![lang_id]);
        // Messages end up in JSON payloads and terminals, not bidi-aware UIs
        bundle.set_use_isolating(false);
        bundle
            .add_resource(resource)
            .map_err(|errors| format!("Failed to add resource to bundle: {:?}", errors))?;

        let mut bundles = self
            .bundles
            .write()
            .map_err(|_| "translation bundles lock poisoned".to_string())?;
        bundles.insert(locale.to_string(), bundle);

        debug!(locale = %locale, "Loaded translations");

        Ok(())
    }

    /// Get a translated message
    pub fn get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> String {
        // Try requested locale, fall back to default, fall back to key
        self.try_get(locale, key, args)
            .or_else(|| self.try_get(&self.default_locale, key, args))
            .unwrap_or_else(|| key.to_string())
    }

    fn try_get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundles = self.bundles.read().ok()?;
        let bundle = bundles.get(locale)?;
        let message = bundle.get_message(key)?;
        let pattern = message.value()?;

        let mut errors = vec![];
        let result = bundle.format_pattern(pattern, args, &mut errors);

        if !errors.is_empty() {
            warn!(key = %key, errors = ?errors, "Fluent formatting errors");
        }

        Some(result.to_string())
    }

    /// Get a translated message with arguments
    pub fn format(&self, locale: &str, key: &str, args: &[(&str, &str)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (k, v) in args {
            fluent_args.set(*k, *v);
        }
        self.get(locale, key, Some(&fluent_args))
    }

    fn load_embedded_en(&self) {
        let en_translations = r#"
# Errors
error-tool-not-found = { $tool } is not installed. Install it to use this feature.
error-wrong-password = Incorrect password. Please try again.
error-protect = Failed to protect PDF: { $detail }
error-unlock = Failed to unlock PDF: { $detail }
error-conversion = System conversion error: { $detail }
error-compression = Failed to compress PDF: { $detail }
error-watermark = Failed to add watermark: { $detail }
error-signature = Failed to apply signature: { $detail }
error-internal = An internal error occurred

# Results
result-converted = File converted successfully
result-compressed = File compressed successfully
result-protected = PDF protected successfully
result-unlocked = PDF unlocked successfully
result-watermarked = Watermark added successfully
result-cleaned = Watermark removal finished
result-signed = Document signed successfully
"#;

        if let Err(e) = self.add_locale("en", en_translations) {
            warn!(error = %e, "Failed to load embedded English translations");
        }
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_message() {
        let i18n = I18n::new();

        let msg = i18n.get("en", "error-wrong-password", None);
        assert_eq!(msg, "Incorrect password. Please try again.");
    }

    #[test]
    fn test_format_message() {
        let i18n = I18n::new();

        let msg = i18n.format("en", "error-tool-not-found", &[("tool", "QPDF")]);
        assert_eq!(msg, "QPDF is not installed. Install it to use this feature.");
    }

    #[test]
    fn test_fallback_to_key() {
        let i18n = I18n::new();

        let msg = i18n.get("en", "nonexistent-key", None);
        assert_eq!(msg, "nonexistent-key");
    }

    #[test]
    fn test_fallback_to_default_locale() {
        let i18n = I18n::new();

        let msg = i18n.get("fr", "result-converted", None);
        assert_eq!(msg, "File converted successfully");
    }

    #[test]
    fn test_added_locale_wins() {
        let i18n = I18n::new();
        i18n.add_locale("es", "error-wrong-password = Contraseña incorrecta.")
            .unwrap();

        assert_eq!(
            i18n.get("es", "error-wrong-password", None),
            "Contraseña incorrecta."
        );
        // Keys missing from the added locale fall back to English
        assert_eq!(
            i18n.get("es", "result-signed", None),
            "Document signed successfully"
        );
    }
}
