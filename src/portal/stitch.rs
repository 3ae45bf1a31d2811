//! Multi-image PDF stitching for the Mid portal.
//!
//! Book/page lookups against the Mid range can answer with one image per
//! recorded page. Each image is itself a single-page PDF; this module
//! combines them into one document in encounter order.

use std::collections::BTreeMap;

use lopdf::{Document, Object, ObjectId};

use super::FetchError;

/// Merges PDF byte buffers into a single PDF, preserving input order.
///
/// # Errors
///
/// Returns [`FetchError::InvalidResponse`] when a part fails to load as a
/// PDF, and [`FetchError::ParseError`] when the merged document cannot be
/// assembled or serialized.
pub fn merge_pdfs(parts: &[Vec<u8>]) -> Result<Vec<u8>, FetchError> {
    if parts.is_empty() {
        return Err(FetchError::invalid_response("no PDF parts to merge"));
    }
    if parts.len() == 1 {
        return Ok(parts[0].clone());
    }

    let mut documents = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        let doc = Document::load_mem(part).map_err(|e| {
            FetchError::invalid_response(format!("image {} is not a loadable PDF: {e}", index + 1))
        })?;
        documents.push(doc);
    }

    merge_documents(documents)
        .map_err(|e| FetchError::parse(format!("failed to assemble merged PDF: {e}")))
}

/// Combines loaded documents into one, renumbering object ids as it goes.
fn merge_documents(documents: Vec<Document>) -> Result<Vec<u8>, String> {
    let mut max_id = 1;
    let mut pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut merged = Document::with_version("1.5");

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, object_id) in doc.get_pages() {
            let object = doc
                .get_object(object_id)
                .map_err(|e| e.to_string())?
                .to_owned();
            pages.insert(object_id, object);
        }
        objects.extend(doc.objects);
    }

    let mut catalog: Option<(ObjectId, Object)> = None;
    let mut pages_root: Option<(ObjectId, Object)> = None;

    for (object_id, object) in &objects {
        match object.type_name().unwrap_or(b"") {
            b"Catalog" => {
                catalog.get_or_insert((*object_id, object.clone()));
            }
            b"Pages" => {
                if let Ok(dictionary) = object.as_dict() {
                    let mut dictionary = dictionary.clone();
                    if let Some((_, existing)) = &pages_root {
                        if let Ok(existing_dict) = existing.as_dict() {
                            dictionary.extend(existing_dict);
                        }
                    }
                    let id = pages_root.as_ref().map_or(*object_id, |(id, _)| *id);
                    pages_root = Some((id, Object::Dictionary(dictionary)));
                }
            }
            // Page objects are re-parented below; outlines are dropped.
            b"Page" | b"Outlines" | b"Outline" => {}
            _ => {
                merged.objects.insert(*object_id, object.clone());
            }
        }
    }

    let (catalog_id, catalog_object) =
        catalog.ok_or_else(|| "no Catalog object in any part".to_string())?;
    let (pages_id, pages_object) =
        pages_root.ok_or_else(|| "no Pages object in any part".to_string())?;

    for (object_id, object) in &pages {
        if let Ok(dictionary) = object.as_dict() {
            let mut dictionary = dictionary.clone();
            dictionary.set("Parent", pages_id);
            merged
                .objects
                .insert(*object_id, Object::Dictionary(dictionary));
        }
    }

    if let Ok(dictionary) = pages_object.as_dict() {
        let mut dictionary = dictionary.clone();
        #[allow(clippy::cast_possible_truncation)]
        dictionary.set("Count", pages.len() as u32);
        dictionary.set(
            "Kids",
            pages.keys().copied().map(Object::Reference).collect::<Vec<_>>(),
        );
        merged.objects.insert(pages_id, Object::Dictionary(dictionary));
    }

    if let Ok(dictionary) = catalog_object.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Pages", pages_id);
        dictionary.remove(b"Outlines");
        merged
            .objects
            .insert(catalog_id, Object::Dictionary(dictionary));
    }

    merged.trailer.set("Root", catalog_id);
    #[allow(clippy::cast_possible_truncation)]
    {
        merged.max_id = merged.objects.len() as u32;
    }
    merged.renumber_objects();
    merged.adjust_zero_pages();
    merged.compress();

    let mut buffer = Vec::new();
    merged.save_to(&mut buffer).map_err(|e| e.to_string())?;
    Ok(buffer)
}
