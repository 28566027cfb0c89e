use lopdf::{Document, Object};
use tracing::debug;

/// Replace every non-empty `/Annots` array with an empty one.
///
/// The annotation objects themselves are left for the writer to drop as
/// unreferenced. Returns the number of pages modified.
pub fn strip_annotations(doc: &mut Document) -> usize {
    let mut modified = 0;

    for (page_number, page_id) in doc.get_pages() {
        let count = match doc.get_dictionary(page_id).and_then(|page| page.get(b"Annots")) {
            Ok(Object::Array(items)) => items.len(),
            Ok(Object::Reference(id)) => doc
                .get_object(*id)
                .and_then(Object::as_array)
                .map(Vec::len)
                .unwrap_or(0),
            _ => 0,
        };
        if count == 0 {
            continue;
        }

        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            page.set("Annots", Object::Array(Vec::new()));
            modified += 1;
            debug!(page = page_number, annotations = count, "Stripped annotations");
        }
    }

    modified
}
