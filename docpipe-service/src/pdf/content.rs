//! Page content and resource editing.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::{PdfError, PdfResult, inherited_attribute};

/// Where a page's resource dictionary physically lives
#[derive(Debug, Clone, Copy)]
enum ResourcesLocation {
    /// Shared dictionary object referenced from the page
    Indirect(ObjectId),
    /// Dictionary stored directly in the page
    Inline,
}

/// Where a resource category (`/Font`, `/XObject`, ...) lives
#[derive(Clone, Copy)]
enum CategoryLocation {
    Indirect(ObjectId),
    Inline,
    Missing,
}

fn resources_location(doc: &mut Document, page_id: ObjectId) -> PdfResult<ResourcesLocation> {
    let own = match doc.get_dictionary(page_id)?.get(b"Resources") {
        Ok(Object::Reference(id)) => Some(ResourcesLocation::Indirect(*id)),
        Ok(Object::Dictionary(_)) => Some(ResourcesLocation::Inline),
        _ => None,
    };
    if let Some(location) = own {
        return Ok(location);
    }

    // Inherited (or absent): give the page its own copy so edits stay local
    let inherited = match inherited_attribute(doc, page_id, b"Resources") {
        Some(Object::Dictionary(dict)) => dict.clone(),
        Some(Object::Reference(id)) => doc
            .get_dictionary(*id)
            .cloned()
            .unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    };
    doc.get_dictionary_mut(page_id)?
        .set("Resources", Object::Dictionary(inherited));
    Ok(ResourcesLocation::Inline)
}

fn resources_mut(
    doc: &mut Document,
    page_id: ObjectId,
    location: ResourcesLocation,
) -> PdfResult<&mut Dictionary> {
    let dict = match location {
        ResourcesLocation::Indirect(id) => doc.get_dictionary_mut(id)?,
        ResourcesLocation::Inline => doc
            .get_dictionary_mut(page_id)?
            .get_mut(b"Resources")?
            .as_dict_mut()?,
    };
    Ok(dict)
}

/// Add `name -> value` to a page's resource category, e.g. `/Font /F1`.
///
/// Handles resources stored inline, by reference, or inherited from the page
/// tree, and category dictionaries stored inline or by reference.
pub fn register_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name: &str,
    value: Object,
) -> PdfResult<()> {
    let location = resources_location(doc, page_id)?;

    let category_location = {
        let resources = resources_mut(doc, page_id, location)?;
        match resources.get(category.as_bytes()) {
            Ok(Object::Reference(id)) => CategoryLocation::Indirect(*id),
            Ok(Object::Dictionary(_)) => CategoryLocation::Inline,
            _ => CategoryLocation::Missing,
        }
    };

    let target = match category_location {
        CategoryLocation::Indirect(id) => doc.get_dictionary_mut(id)?,
        CategoryLocation::Inline | CategoryLocation::Missing => {
            let resources = resources_mut(doc, page_id, location)?;
            if matches!(category_location, CategoryLocation::Missing) {
                resources.set(category, Dictionary::new());
            }
            resources.get_mut(category.as_bytes())?.as_dict_mut()?
        }
    };
    target.set(name, value);
    Ok(())
}

/// Draw `operations` on top of the page's existing content.
///
/// The existing content is wrapped in `q ... Q` so its graphics state cannot
/// leak into the overlay.
pub fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    operations: Vec<Operation>,
) -> PdfResult<()> {
    let overlay = Content { operations }.encode()?;

    let existing: Vec<Object> = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Stream(_)) => {
            return Err(PdfError::Invalid(
                "page content stream stored inline".to_string(),
            ));
        }
        _ => Vec::new(),
    };

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut closing = b"Q\n".to_vec();
    closing.extend(overlay);
    let close_id = doc.add_object(Stream::new(Dictionary::new(), closing));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(close_id));

    doc.get_dictionary_mut(page_id)?
        .set("Contents", Object::Array(contents));
    Ok(())
}
