use std::collections::HashMap;

use log::debug;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::entries::{clean_title, short_id, EntryNode, EntryTarget};
use crate::error::Result;
use crate::pdf::document::{decode_pdf_string, page_size};

/// Guards against malformed outlines whose sibling or child links loop.
const MAX_OUTLINE_DEPTH: usize = 64;

/// Read the document's existing bookmarks as an entry forest.
///
/// Imported entries start collapsed and get `imported-` ids. URI actions stay external
/// links and `XYZ` destinations keep their position. Destinations that cannot be
/// resolved to a page point at page 1.
pub fn import_outline(doc: &Document) -> Result<Vec<EntryNode>> {
    let catalog = doc.catalog()?;

    let outlines = match catalog.get(b"Outlines") {
        Ok(Object::Reference(r)) => match doc.get_dictionary(*r) {
            Ok(d) => d,
            _ => return Ok(Vec::new()),
        },
        Ok(Object::Dictionary(d)) => d,
        _ => return Ok(Vec::new()),
    };

    let first_ref = match outlines.get(b"First") {
        Ok(Object::Reference(r)) => *r,
        _ => return Ok(Vec::new()),
    };

    let page_map: HashMap<ObjectId, u32> = doc
        .get_pages()
        .into_iter()
        .map(|(num, id)| (id, num))
        .collect();

    let mut visited = Vec::new();
    let entries = parse_outline_items(doc, first_ref, &page_map, 0, &mut visited);
    debug!("Imported {} top-level bookmark(s)", entries.len());
    Ok(entries)
}

fn parse_outline_items(
    doc: &Document,
    first_id: ObjectId,
    page_map: &HashMap<ObjectId, u32>,
    depth: usize,
    visited: &mut Vec<ObjectId>,
) -> Vec<EntryNode> {
    let mut entries = Vec::new();
    if depth > MAX_OUTLINE_DEPTH {
        return entries;
    }
    let mut current_id = Some(first_id);

    while let Some(id) = current_id {
        if visited.contains(&id) {
            break;
        }
        visited.push(id);

        let dict = match doc.get_dictionary(id) {
            Ok(d) => d,
            Err(_) => break,
        };

        let title = match dict.get(b"Title") {
            Ok(Object::String(bytes, _)) => clean_title(&decode_pdf_string(bytes)),
            _ => "Untitled".to_string(),
        };

        let target = get_destination(doc, dict, page_map).unwrap_or(EntryTarget::Page(1));

        let children = match dict.get(b"First") {
            Ok(Object::Reference(child_ref)) => {
                parse_outline_items(doc, *child_ref, page_map, depth + 1, visited)
            }
            _ => Vec::new(),
        };

        entries.push(EntryNode {
            id: format!("imported-{}", short_id()),
            target,
            ..EntryNode::new(title, 1).with_children(children).with_open(false)
        });

        current_id = match dict.get(b"Next") {
            Ok(Object::Reference(r)) => Some(*r),
            _ => None,
        };
    }

    entries
}

fn get_destination(
    doc: &Document,
    dict: &Dictionary,
    page_map: &HashMap<ObjectId, u32>,
) -> Option<EntryTarget> {
    if let Ok(dest) = dict.get(b"Dest") {
        return resolve_destination(doc, dest, page_map, 0);
    }

    let action = match dict.get(b"A") {
        Ok(Object::Reference(action_ref)) => doc.get_dictionary(*action_ref).ok()?,
        Ok(Object::Dictionary(action)) => action,
        _ => return None,
    };
    match action.get(b"S") {
        Ok(Object::Name(action_type)) if action_type == b"GoTo" => {
            resolve_destination(doc, action.get(b"D").ok()?, page_map, 0)
        }
        Ok(Object::Name(action_type)) if action_type == b"URI" => {
            match action.get(b"URI").ok()? {
                Object::String(uri, _) => Some(EntryTarget::Uri(decode_pdf_string(uri))),
                _ => None,
            }
        }
        _ => None,
    }
}

fn resolve_destination(
    doc: &Document,
    dest: &Object,
    page_map: &HashMap<ObjectId, u32>,
    hops: usize,
) -> Option<EntryTarget> {
    if hops > 8 {
        return None;
    }
    match dest {
        Object::String(name, _) | Object::Name(name) => {
            resolve_named_destination(doc, name, page_map, hops)
        }
        Object::Array(arr) => explicit_destination(doc, arr, page_map),
        Object::Reference(r) => {
            resolve_destination(doc, doc.get_object(*r).ok()?, page_map, hops + 1)
        }
        // named destination entries may wrap the array as << /D [...] >>
        Object::Dictionary(d) => resolve_destination(doc, d.get(b"D").ok()?, page_map, hops + 1),
        _ => None,
    }
}

/// `[page_ref /XYZ left top zoom]` keeps its position as fractions of the page size.
/// Every other form jumps to the page.
fn explicit_destination(
    doc: &Document,
    dest: &[Object],
    page_map: &HashMap<ObjectId, u32>,
) -> Option<EntryTarget> {
    let page_ref = match dest.first() {
        Some(Object::Reference(r)) => *r,
        _ => return None,
    };
    let page = *page_map.get(&page_ref)?;

    let is_xyz = matches!(dest.get(1), Some(Object::Name(kind)) if kind == b"XYZ");
    let left = dest.get(2).and_then(|v| v.as_float().ok());
    let top = dest.get(3).and_then(|v| v.as_float().ok());
    match (is_xyz, left, top) {
        (true, Some(left), Some(top)) => {
            let (width, height) = page_size(doc, page_ref);
            let x = (left / width).clamp(0.0, 1.0);
            let y = (top / height).clamp(0.0, 1.0);
            Some(EntryTarget::Position(page, x, y))
        }
        _ => Some(EntryTarget::Page(page)),
    }
}

fn resolve_named_destination(
    doc: &Document,
    name: &[u8],
    page_map: &HashMap<ObjectId, u32>,
    hops: usize,
) -> Option<EntryTarget> {
    let catalog = doc.catalog().ok()?;

    if let Ok(Object::Reference(names_ref)) = catalog.get(b"Names") {
        if let Ok(names_dict) = doc.get_dictionary(*names_ref) {
            if let Ok(Object::Reference(dests_ref)) = names_dict.get(b"Dests") {
                if let Some(dest) = search_name_tree(doc, *dests_ref, name, 0) {
                    return resolve_destination(doc, dest, page_map, hops + 1);
                }
            }
        }
    }

    // Dests dictionary (older style)
    if let Ok(Object::Reference(dests_ref)) = catalog.get(b"Dests") {
        if let Ok(dests_dict) = doc.get_dictionary(*dests_ref) {
            if let Ok(dest) = dests_dict.get(name) {
                return resolve_destination(doc, dest, page_map, hops + 1);
            }
        }
    }

    None
}

fn search_name_tree<'a>(
    doc: &'a Document,
    node_id: ObjectId,
    name: &[u8],
    depth: usize,
) -> Option<&'a Object> {
    if depth > MAX_OUTLINE_DEPTH {
        return None;
    }
    let dict = doc.get_dictionary(node_id).ok()?;

    if let Ok(Object::Array(names)) = dict.get(b"Names") {
        for chunk in names.chunks_exact(2) {
            if let Object::String(key, _) = &chunk[0] {
                if key == name {
                    return Some(&chunk[1]);
                }
            }
        }
    }

    if let Ok(Object::Array(kids)) = dict.get(b"Kids") {
        for kid in kids {
            if let Object::Reference(kid_ref) = kid {
                if let Some(dest) = search_name_tree(doc, *kid_ref, name, depth + 1) {
                    return Some(dest);
                }
            }
        }
    }

    None
}
