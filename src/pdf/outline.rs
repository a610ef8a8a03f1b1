use log::info;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::entries::{flatten, EntryNode, EntryTarget};
use crate::error::Result;
use crate::page_index::PageIndexMapper;
use crate::pdf::document::{encode_text_string, PdfDocument};

/// Target page of a bookmark destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub id: ObjectId,
    pub width: f32,
    pub height: f32,
}

/// Bookmark objects ready to be written, with every cross reference already filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineGraph {
    pub root: ObjectId,
    pub objects: Vec<(ObjectId, Dictionary)>,
}

/// Number of rows shown under `nodes` when their parent is expanded. Closed nodes
/// count themselves but hide their subtree.
pub fn visible_count(nodes: &[EntryNode]) -> i64 {
    nodes
        .iter()
        .map(|node| {
            1 + if node.open {
                visible_count(&node.children)
            } else {
                0
            }
        })
        .sum()
}

fn subtree_size(node: &EntryNode) -> usize {
    1 + node.children.iter().map(subtree_size).sum::<usize>()
}

/// Build the bookmark graph for `entries`, or `None` for an empty forest.
///
/// One id per node is drawn from `alloc` up front, in pre-order, so sibling and
/// parent links can be written before the nodes they point at.
pub fn assemble_outline(
    entries: &[EntryNode],
    mapper: &PageIndexMapper,
    pages: &[PageInfo],
    mut alloc: impl FnMut() -> ObjectId,
) -> Option<OutlineGraph> {
    if entries.is_empty() || pages.is_empty() {
        return None;
    }

    let root = alloc();
    let refs: Vec<ObjectId> = flatten(entries).iter().map(|_| alloc()).collect();

    let mut objects = Vec::with_capacity(refs.len() + 1);
    let (first, last) = assemble_level(entries, &refs, 0, root, mapper, pages, &mut objects);

    objects.push((
        root,
        dictionary! {
            "Type" => "Outlines",
            "First" => first,
            "Last" => last,
            "Count" => visible_count(entries),
        },
    ));

    Some(OutlineGraph { root, objects })
}

/// Emit `nodes`, whose first pre-order ref is `refs[start]`. Returns the first and
/// last sibling refs.
fn assemble_level(
    nodes: &[EntryNode],
    refs: &[ObjectId],
    start: usize,
    parent: ObjectId,
    mapper: &PageIndexMapper,
    pages: &[PageInfo],
    objects: &mut Vec<(ObjectId, Dictionary)>,
) -> (ObjectId, ObjectId) {
    let mut sibling_refs = Vec::with_capacity(nodes.len());
    let mut offset = start;
    for node in nodes {
        sibling_refs.push(offset);
        offset += subtree_size(node);
    }

    for (i, node) in nodes.iter().enumerate() {
        let index = sibling_refs[i];
        let id = refs[index];

        let mut dict = dictionary! {
            "Title" => encode_text_string(&node.title),
            "Parent" => parent,
        };
        if i > 0 {
            dict.set("Prev", refs[sibling_refs[i - 1]]);
        }
        if let Some(next) = sibling_refs.get(i + 1) {
            dict.set("Next", refs[*next]);
        }

        if !node.children.is_empty() {
            let (first, last) =
                assemble_level(&node.children, refs, index + 1, id, mapper, pages, objects);
            let count = visible_count(&node.children);
            dict.set("First", first);
            dict.set("Last", last);
            dict.set("Count", if node.open { count } else { -count });
        }

        match destination(&node.target, mapper, pages) {
            Destination::Page(dest) => dict.set("Dest", dest),
            Destination::Uri(uri) => dict.set(
                "A",
                dictionary! {
                    "S" => "URI",
                    "URI" => Object::string_literal(uri),
                },
            ),
        }

        objects.push((id, dict));
    }

    (refs[sibling_refs[0]], refs[sibling_refs[sibling_refs.len() - 1]])
}

enum Destination {
    Page(Vec<Object>),
    Uri(String),
}

fn destination(target: &EntryTarget, mapper: &PageIndexMapper, pages: &[PageInfo]) -> Destination {
    let page_at = |page: u32| pages[mapper.final_index(i64::from(page)).min(pages.len() - 1)];
    match target {
        EntryTarget::Page(page) => {
            Destination::Page(vec![page_at(*page).id.into(), "Fit".into()])
        }
        EntryTarget::Position(page, x, y) => {
            let info = page_at(*page);
            Destination::Page(vec![
                info.id.into(),
                "XYZ".into(),
                Object::Real(info.width * x),
                Object::Real(info.height * y),
                Object::Null,
            ])
        }
        EntryTarget::Uri(uri) => Destination::Uri(uri.clone()),
    }
}

/// Replace the document outline with one built from `entries`.
///
/// An empty forest leaves any existing outline untouched. Returns whether an
/// outline was written.
pub fn write_outline(
    pdf: &mut PdfDocument,
    entries: &[EntryNode],
    mapper: &PageIndexMapper,
) -> Result<bool> {
    let pages: Vec<PageInfo> = pdf
        .page_ids()
        .into_iter()
        .map(|(_, id)| {
            let (width, height) = pdf.page_size(id);
            PageInfo { id, width, height }
        })
        .collect();

    let doc = &mut pdf.doc;
    let Some(graph) = assemble_outline(entries, mapper, &pages, || doc.new_object_id()) else {
        return Ok(false);
    };
    attach_outline(doc, graph)?;
    Ok(true)
}

pub fn attach_outline(doc: &mut Document, graph: OutlineGraph) -> Result<()> {
    let count = graph.objects.len() - 1;
    for (id, dict) in graph.objects {
        doc.objects.insert(id, Object::Dictionary(dict));
    }

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
    if catalog.has(b"Outlines") {
        info!("Replacing existing outline");
    }
    catalog.set("Outlines", graph.root);
    catalog.set("PageMode", "UseOutlines");
    info!("Wrote outline with {} item(s)", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::testing::sample_pdf;

    fn pages(count: u32) -> Vec<PageInfo> {
        (0..count)
            .map(|i| PageInfo {
                id: (100 + i, 0),
                width: 600.0,
                height: 800.0,
            })
            .collect()
    }

    fn allocator() -> impl FnMut() -> ObjectId {
        let mut next = 0;
        move || {
            next += 1;
            (next, 0)
        }
    }

    fn find<'a>(graph: &'a OutlineGraph, title: &str) -> (ObjectId, &'a Dictionary) {
        graph
            .objects
            .iter()
            .find(|(_, dict)| {
                dict.get(b"Title")
                    .ok()
                    .and_then(|t| t.as_str().ok())
                    .is_some_and(|bytes| {
                        crate::pdf::document::decode_pdf_string(bytes) == title
                    })
            })
            .map(|(id, dict)| (*id, dict))
            .unwrap()
    }

    fn reference(dict: &Dictionary, key: &[u8]) -> ObjectId {
        dict.get(key).unwrap().as_reference().unwrap()
    }

    #[test]
    fn test_links_and_counts() {
        let entries = vec![
            EntryNode::new("Intro", 1).with_children(vec![
                EntryNode::new("Setup", 2),
                EntryNode::new("Install", 3),
            ]),
            EntryNode::new("Usage", 5),
        ];
        let mapper = PageIndexMapper::new(0, 2, 1, 11);
        let graph = assemble_outline(&entries, &mapper, &pages(11), allocator()).unwrap();
        assert_eq!(graph.objects.len(), 5);

        let (intro_id, intro) = find(&graph, "Intro");
        let (setup_id, setup) = find(&graph, "Setup");
        let (install_id, install) = find(&graph, "Install");
        let (usage_id, usage) = find(&graph, "Usage");

        assert_eq!(reference(intro, b"Parent"), graph.root);
        assert_eq!(reference(intro, b"Next"), usage_id);
        assert_eq!(reference(usage, b"Prev"), intro_id);
        assert!(!intro.has(b"Prev"));
        assert!(!usage.has(b"Next"));

        assert_eq!(reference(intro, b"First"), setup_id);
        assert_eq!(reference(intro, b"Last"), install_id);
        assert_eq!(reference(setup, b"Parent"), intro_id);
        assert_eq!(reference(setup, b"Next"), install_id);
        assert_eq!(intro.get(b"Count").unwrap().as_i64().unwrap(), 2);
        assert!(!usage.has(b"Count"));

        // "Usage" on logical page 5 lands on index 5 after one inserted page
        let dest = usage.get(b"Dest").unwrap().as_array().unwrap();
        assert_eq!(dest[0].as_reference().unwrap(), (105, 0));
        assert_eq!(dest[1].as_name().unwrap(), b"Fit");
        // "Intro" on page 1 precedes the insertion point
        let dest = intro.get(b"Dest").unwrap().as_array().unwrap();
        assert_eq!(dest[0].as_reference().unwrap(), (100, 0));

        let root = graph.objects.iter().find(|(id, _)| *id == graph.root).unwrap();
        assert_eq!(reference(&root.1, b"First"), intro_id);
        assert_eq!(reference(&root.1, b"Last"), usage_id);
        assert_eq!(root.1.get(b"Count").unwrap().as_i64().unwrap(), 4);
    }

    #[test]
    fn test_closed_node_has_negative_count() {
        let entries = vec![EntryNode::new("Part", 1)
            .with_open(false)
            .with_children(vec![EntryNode::new("A", 2), EntryNode::new("B", 3)])];
        let mapper = PageIndexMapper::new(0, 2, 0, 5);
        let graph = assemble_outline(&entries, &mapper, &pages(5), allocator()).unwrap();
        let (_, part) = find(&graph, "Part");
        assert_eq!(part.get(b"Count").unwrap().as_i64().unwrap(), -2);

        let root = graph.objects.iter().find(|(id, _)| *id == graph.root).unwrap();
        assert_eq!(root.1.get(b"Count").unwrap().as_i64().unwrap(), 1);
    }

    #[test]
    fn test_visible_count_stops_at_closed_subtrees() {
        let entries = vec![EntryNode::new("a", 1).with_children(vec![
            EntryNode::new("b", 1)
                .with_open(false)
                .with_children(vec![EntryNode::new("hidden", 1)]),
            EntryNode::new("c", 1).with_children(vec![EntryNode::new("shown", 1)]),
        ])];
        assert_eq!(visible_count(&entries), 5);
        assert_eq!(visible_count(&entries[0].children), 4);
    }

    #[test]
    fn test_position_and_uri_destinations() {
        let mut link = EntryNode::new("Site", 1);
        link.target = EntryTarget::Uri("https://example.com".to_string());
        let mut exact = EntryNode::new("Exact", 1);
        exact.target = EntryTarget::Position(3, 0.5, 0.25);

        let mapper = PageIndexMapper::new(0, 2, 0, 5);
        let graph = assemble_outline(&[link, exact], &mapper, &pages(5), allocator()).unwrap();

        let (_, site) = find(&graph, "Site");
        let action = site.get(b"A").unwrap().as_dict().unwrap();
        assert_eq!(action.get(b"S").unwrap().as_name().unwrap(), b"URI");
        assert!(!site.has(b"Dest"));

        let (_, exact) = find(&graph, "Exact");
        let dest = exact.get(b"Dest").unwrap().as_array().unwrap();
        assert_eq!(dest[0].as_reference().unwrap(), (102, 0));
        assert_eq!(dest[1].as_name().unwrap(), b"XYZ");
        assert_eq!(dest[2].as_float().unwrap(), 300.0);
        assert_eq!(dest[3].as_float().unwrap(), 200.0);
    }

    #[test]
    fn test_empty_forest_leaves_outline_untouched() {
        let mut pdf = PdfDocument { doc: sample_pdf(3) };
        let mapper = PageIndexMapper::new(0, 2, 0, 3);
        assert!(!write_outline(&mut pdf, &[], &mapper).unwrap());
        assert!(pdf.doc.catalog().unwrap().get(b"Outlines").is_err());
    }

    #[test]
    fn test_write_outline_replaces_catalog_entry() {
        let mut pdf = PdfDocument { doc: sample_pdf(3) };
        let mapper = PageIndexMapper::new(0, 2, 0, 3);
        assert!(write_outline(&mut pdf, &[EntryNode::new("One", 1)], &mapper).unwrap());
        let first_root = pdf.doc.catalog().unwrap().get(b"Outlines").unwrap().as_reference().unwrap();

        assert!(write_outline(&mut pdf, &[EntryNode::new("Two", 2)], &mapper).unwrap());
        let catalog = pdf.doc.catalog().unwrap();
        let root = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
        assert_ne!(root, first_root);
        assert_eq!(catalog.get(b"PageMode").unwrap().as_name().unwrap(), b"UseOutlines");
    }
}
