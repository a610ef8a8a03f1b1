use log::debug;
use lopdf::{dictionary, Document, Object, ObjectId};

use crate::error::Result;
use crate::layout::{LinkTarget, PendingAnnotation};
use crate::page_index::PageIndexMapper;

/// Turn pending ToC links into Link annotations on their host pages.
///
/// `hosts` maps a layout page ordinal to the inserted page object. Targets already
/// carry the page offset, so `mapper` must not add it again. Annotations are
/// appended to each page's `/Annots` in the order they were laid out. Returns the
/// number of annotations written.
pub fn resolve_annotations(
    doc: &mut Document,
    pending: Vec<PendingAnnotation>,
    hosts: &[ObjectId],
    mapper: &PageIndexMapper,
) -> Result<usize> {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let mut written = 0;

    for annotation in pending {
        let Some(&host) = hosts.get(annotation.host_page) else {
            debug!(
                "Skipping link on missing ToC page {}",
                annotation.host_page
            );
            continue;
        };

        let rect: Vec<Object> = annotation.rect.iter().map(|v| Object::Real(*v)).collect();
        let mut link = dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => rect,
            "Border" => vec![0.into(), 0.into(), 0.into()],
        };
        match annotation.target {
            LinkTarget::Page(page) => {
                let Some(&target) = pages.get(mapper.final_index(page)) else {
                    continue;
                };
                link.set("Dest", vec![target.into(), "Fit".into()]);
            }
            LinkTarget::Uri(uri) => link.set(
                "A",
                dictionary! {
                    "S" => "URI",
                    "URI" => Object::string_literal(uri),
                },
            ),
        }

        let link_id = doc.add_object(link);
        append_annotation(doc, host, link_id)?;
        written += 1;
    }

    debug!("Attached {} link annotation(s)", written);
    Ok(written)
}

fn append_annotation(doc: &mut Document, page_id: ObjectId, annot: ObjectId) -> Result<()> {
    let existing = doc.get_dictionary(page_id)?.get(b"Annots").ok().cloned();
    match existing {
        Some(Object::Reference(array_id)) => {
            if let Ok(Object::Array(annots)) = doc.get_object_mut(array_id) {
                annots.push(annot.into());
                return Ok(());
            }
            // dangling reference; replace it with a direct array
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            page.set("Annots", vec![Object::Reference(annot)]);
        }
        Some(Object::Array(mut annots)) => {
            annots.push(annot.into());
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            page.set("Annots", annots);
        }
        _ => {
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            page.set("Annots", vec![Object::Reference(annot)]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::testing::sample_pdf;

    fn annots(doc: &Document, page: ObjectId) -> Vec<ObjectId> {
        let value = doc.get_dictionary(page).unwrap().get(b"Annots").unwrap();
        let array = match value {
            Object::Reference(id) => doc.get_object(*id).unwrap().as_array().unwrap(),
            other => other.as_array().unwrap(),
        };
        array.iter().map(|o| o.as_reference().unwrap()).collect()
    }

    fn pending(host_page: usize, target: LinkTarget) -> PendingAnnotation {
        PendingAnnotation {
            host_page,
            rect: [70.0, 700.0, 520.0, 715.0],
            target,
        }
    }

    #[test]
    fn test_resolves_targets_after_insertion() {
        // page 2 plays the part of the single inserted ToC page
        let mut doc = sample_pdf(11);
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let mapper = PageIndexMapper::new(0, 2, 1, 11);

        let written = resolve_annotations(
            &mut doc,
            vec![
                pending(0, LinkTarget::Page(1)),
                pending(0, LinkTarget::Page(5)),
                pending(0, LinkTarget::Page(40)),
            ],
            &[pages[1]],
            &mapper,
        )
        .unwrap();
        assert_eq!(written, 3);

        let links = annots(&doc, pages[1]);
        let targets: Vec<ObjectId> = links
            .iter()
            .map(|id| {
                let dict = doc.get_dictionary(*id).unwrap();
                dict.get(b"Dest").unwrap().as_array().unwrap()[0]
                    .as_reference()
                    .unwrap()
            })
            .collect();
        assert_eq!(targets, vec![pages[0], pages[5], pages[10]]);
    }

    #[test]
    fn test_appends_to_existing_annots_in_order() {
        let mut doc = sample_pdf(3);
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let existing = doc.add_object(dictionary! { "Type" => "Annot", "Subtype" => "Text" });
        let array_id = doc.add_object(vec![Object::Reference(existing)]);
        doc.get_object_mut(pages[0])
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", array_id);

        let mapper = PageIndexMapper::new(0, 1, 0, 3);
        resolve_annotations(
            &mut doc,
            vec![
                pending(0, LinkTarget::Page(2)),
                pending(0, LinkTarget::Uri("https://example.com".to_string())),
            ],
            &[pages[0]],
            &mapper,
        )
        .unwrap();

        let links = annots(&doc, pages[0]);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0], existing);
        let uri = doc.get_dictionary(links[2]).unwrap();
        let action = uri.get(b"A").unwrap().as_dict().unwrap();
        assert_eq!(action.get(b"S").unwrap().as_name().unwrap(), b"URI");
    }

    #[test]
    fn test_missing_host_is_skipped() {
        let mut doc = sample_pdf(2);
        let mapper = PageIndexMapper::new(0, 1, 0, 2);
        let written =
            resolve_annotations(&mut doc, vec![pending(3, LinkTarget::Page(1))], &[], &mapper)
                .unwrap();
        assert_eq!(written, 0);
    }
}
