//! Built-in minimal renderer: plain HTML pages and CMS composites.

use pagesync_core::cms::CmsItem;
use pagesync_core::contract::{escape_html, LinkMap, RenderError, Renderer};
use pagesync_core::model::{RenderKind, Resource};
use pagesync_core::objects::{ObjectGraph, ObjectMap, RawObject};

#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

fn document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn block_html(object: &RawObject, links: &LinkMap) -> Option<String> {
    if object.is_resource_root() {
        let title = object.title.as_deref().unwrap_or("Untitled");
        let href = links
            .get(&object.id)
            .map(|slug| format!(" href=\"{}\"", escape_html(slug)))
            .unwrap_or_default();
        return Some(format!(
            "<p class=\"child\"><a{href} data-resource-id=\"{}\">{}</a></p>\n",
            escape_html(&object.id),
            escape_html(title)
        ));
    }
    let text = object.text.as_deref().filter(|t| !t.trim().is_empty())?;
    let tag = match object.block_type.as_deref() {
        Some("heading_1") => "h2",
        Some("heading_2") => "h3",
        Some("heading_3") => "h4",
        Some("quote") => "blockquote",
        Some("code") => "pre",
        _ => "p",
    };
    Some(format!("<{tag}>{}</{tag}>\n", escape_html(text)))
}

/// Blocks of the page in document order. Child pages and databases become
/// links and are not descended into. Children without a render keep a bare
/// anchor.
fn collect_blocks(node: &ObjectGraph, objects: &ObjectMap, links: &LinkMap, out: &mut String) {
    for child in &node.children {
        let Some(object) = objects.get(&child.object_id) else {
            continue;
        };
        if let Some(html) = block_html(object, links) {
            out.push_str(&html);
        }
        if !object.is_resource_root() {
            collect_blocks(child, objects, links, out);
        }
    }
}

fn part_html(resource: &Resource) -> String {
    let summary = resource
        .cms_properties()
        .and_then(|p| p.summary.as_deref())
        .map(|s| format!("<p>{}</p>\n", escape_html(s)))
        .unwrap_or_default();
    let link = resource
        .render(RenderKind::Html)
        .map(|r| format!(" href=\"{}\"", escape_html(&r.slug)))
        .unwrap_or_default();
    format!(
        "<section data-resource-id=\"{}\">\n<h2><a{link}>{}</a></h2>\n{summary}</section>\n",
        escape_html(resource.id()),
        escape_html(resource.title())
    )
}

impl Renderer for HtmlRenderer {
    fn render_resource(
        &self,
        resource: &Resource,
        graph: &ObjectGraph,
        objects: &ObjectMap,
        links: &LinkMap,
        kind: RenderKind,
    ) -> Result<String, RenderError> {
        match kind {
            RenderKind::Html => {
                let mut body = format!("<h1>{}</h1>\n", escape_html(resource.title()));
                collect_blocks(graph, objects, links, &mut body);
                Ok(document(resource.title(), &body))
            }
            RenderKind::Pdf => Err("PDF rendering is not supported by the built-in renderer".into()),
            RenderKind::File => Err("files are imported, not rendered".into()),
        }
    }

    fn render_cms_item(
        &self,
        item: &CmsItem,
        parts: &[Resource],
        framing: &[Resource],
    ) -> Result<String, RenderError> {
        let frame = |id: &Option<String>, tag: &str| -> String {
            id.as_ref()
                .and_then(|id| framing.iter().find(|r| r.id() == id))
                .map(|r| format!("<{tag}>{}</{tag}>\n", escape_html(r.title())))
                .unwrap_or_default()
        };
        let mut body = String::new();
        body.push_str(&frame(&item.framing.header_id, "header"));
        body.push_str(&frame(&item.framing.menu_id, "nav"));
        body.push_str("<main>\n");
        for part in parts {
            body.push_str(&part_html(part));
        }
        body.push_str("</main>\n");
        body.push_str(&frame(&item.framing.footer_id, "footer"));

        let title = parts.first().map(Resource::title).unwrap_or("Home");
        Ok(document(title, &body))
    }
}
