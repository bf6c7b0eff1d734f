use tempfile::{tempdir, TempDir};

use pagesync_core::cms::{
    CmsItemType, CmsPageType, CmsProperties, CmsViewEngine, ContentTree, NodeType,
};
use pagesync_core::model::{EditableResource, Resource};
use pagesync_core::paths::PathProfile;
use pagesync_core::Repository;

const CMS_DB: &str = "cms-db";

fn cms_repo() -> (TempDir, Repository, CmsViewEngine) {
    let dir = tempdir().unwrap();
    let mut repo =
        Repository::init(dir.path(), PathProfile::Publishing, Some(CMS_DB.into())).unwrap();
    repo.add_resource(Resource::Database(EditableResource::new(CMS_DB, "Site")))
        .unwrap();
    let engine = CmsViewEngine::attach(&mut repo);
    (dir, repo, engine)
}

fn cms_page(
    id: &str,
    title: &str,
    page_type: CmsPageType,
    categories: &[&str],
    sequence: Option<i64>,
) -> Resource {
    let mut page = EditableResource::new(id, title);
    page.header.parent_resource_id = Some(CMS_DB.into());
    page.cms_properties = Some(CmsProperties {
        page_type,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        sequence,
        ..Default::default()
    });
    Resource::Page(page)
}

fn item_slugs(repo: &Repository) -> Vec<String> {
    repo.cms_items().unwrap().map(|i| i.slug.clone()).collect()
}

fn parts(repo: &Repository, slug: &str) -> Vec<String> {
    repo.registry().unwrap().cms_items[slug].parts.clone()
}

#[test]
fn adding_a_page_creates_its_item_and_ancestor_containers() {
    let (_dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs"], None))
        .unwrap();

    assert_eq!(item_slugs(&repo), vec!["", "/docs", "/docs/setup"]);
    let items = &repo.registry().unwrap().cms_items;
    assert_eq!(items["/docs/setup"].item_type, CmsItemType::Page);
    assert_eq!(items["/docs"].item_type, CmsItemType::CategoryPage);
    assert_eq!(items[""].item_type, CmsItemType::CategoryPage);
    assert_eq!(items["/docs/setup"].render_file_name, "docs/setup.html");
    assert_eq!(items[""].render_file_name, "index.html");
    assert!(items.values().all(|i| i.dirty));
}

#[test]
fn recategorising_moves_items_and_removing_cleans_up() {
    let (_dir, mut repo, _engine) = cms_repo();
    let page = cms_page("a", "Setup", CmsPageType::Page, &["Docs"], None);
    repo.add_resource(page.clone()).unwrap();

    let mut moved = page;
    moved
        .editable_mut()
        .and_then(|e| e.cms_properties.as_mut())
        .unwrap()
        .categories = vec!["Guides".into()];
    repo.update_resource(moved).unwrap();
    assert_eq!(item_slugs(&repo), vec!["", "/guides", "/guides/setup"]);

    repo.remove_resource("a", false).unwrap();
    assert!(item_slugs(&repo).is_empty());
}

#[test]
fn removing_one_of_two_pages_keeps_shared_container() {
    let (_dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs"], Some(2)))
        .unwrap();
    repo.add_resource(cms_page("b", "Usage", CmsPageType::Page, &["Docs"], Some(1)))
        .unwrap();
    assert_eq!(parts(&repo, "/docs"), vec!["b", "a"]);

    repo.remove_resource("a", false).unwrap();
    assert_eq!(item_slugs(&repo), vec!["", "/docs", "/docs/usage"]);
    assert_eq!(parts(&repo, "/docs"), vec!["b"]);
    assert_eq!(parts(&repo, ""), vec!["b"]);
}

#[test]
fn sections_share_one_item_ordered_by_sequence() {
    let (_dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("s1", "Install", CmsPageType::Section, &["Docs"], Some(2)))
        .unwrap();
    repo.add_resource(cms_page("s2", "Intro", CmsPageType::Section, &["Docs"], Some(1)))
        .unwrap();

    let items = &repo.registry().unwrap().cms_items;
    assert_eq!(items["/docs"].item_type, CmsItemType::SectionedPage);
    assert_eq!(items["/docs"].parts, vec!["s2", "s1"]);
    assert!(!items.contains_key("/docs#install"));
}

#[test]
fn galleries_get_an_index_and_one_card_each() {
    let (_dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("g1", "Sun", CmsPageType::Gallery, &["Photos"], None))
        .unwrap();
    repo.add_resource(cms_page("g2", "Moon", CmsPageType::Gallery, &["Photos"], None))
        .unwrap();

    let items = &repo.registry().unwrap().cms_items;
    assert_eq!(items["/photos"].item_type, CmsItemType::GalleryPage);
    assert_eq!(items["/photos"].parts, vec!["g2", "g1"]);
    assert_eq!(items["/photos/sun"].item_type, CmsItemType::Page);
    assert_eq!(items["/photos/moon"].parts, vec!["g2"]);
}

#[test]
fn framing_changes_recalculate_every_item() {
    let (_dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs"], None))
        .unwrap();
    repo.add_resource(cms_page("h", "Top", CmsPageType::Header, &[], None))
        .unwrap();
    repo.add_resource(cms_page("f", "Docs Footer", CmsPageType::Footer, &["Docs"], None))
        .unwrap();

    {
        let items = &repo.registry().unwrap().cms_items;
        assert!(items.values().all(|i| i.framing.header_id.as_deref() == Some("h")));
        assert_eq!(items[""].framing.footer_id, None);
        assert_eq!(items["/docs/setup"].framing.footer_id.as_deref(), Some("f"));
        assert!(!items.contains_key("/docs/docs-footer"));
    }

    repo.remove_resource("h", false).unwrap();
    let items = &repo.registry().unwrap().cms_items;
    assert!(items.values().all(|i| i.framing.header_id.is_none()));
}

#[test]
fn updates_mark_referencing_items_dirty_but_render_only_changes_do_not() {
    let (dir, mut repo, _engine) = cms_repo();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs"], None))
        .unwrap();

    let render = dir.path().join("render.tmp");
    std::fs::write(&render, "<p>setup</p>").unwrap();
    for slug in item_slugs(&repo) {
        repo.import_cms_render(&slug, &render).unwrap();
    }
    assert!(repo.cms_items().unwrap().all(|i| !i.dirty));
    assert!(dir.path().join("site/docs/setup.html").exists());
    assert!(dir.path().join("site/index.html").exists());

    repo.import_resource_render("a", pagesync_core::model::RenderKind::Html, &render)
        .unwrap();
    assert!(repo.cms_items().unwrap().all(|i| !i.dirty));

    let mut edited = repo.resource("a").unwrap().clone();
    edited.editable_mut().unwrap().keywords = vec!["new".into()];
    repo.update_resource(edited).unwrap();
    assert!(repo.cms_items().unwrap().all(|i| i.dirty));
}

#[test]
fn unpublished_and_foreign_pages_stay_off_the_site() {
    let (_dir, mut repo, _engine) = cms_repo();
    let mut draft = cms_page("d", "Draft", CmsPageType::Page, &["Docs"], None);
    draft
        .editable_mut()
        .and_then(|e| e.cms_properties.as_mut())
        .unwrap()
        .status = Some("Draft".into());
    repo.add_resource(draft).unwrap();

    let mut foreign = cms_page("x", "Elsewhere", CmsPageType::Page, &["Docs"], None);
    foreign.header_mut().parent_resource_id = None;
    repo.add_resource(foreign).unwrap();

    repo.add_resource(cms_page("i", "Notes", CmsPageType::Internal, &["Docs"], None))
        .unwrap();

    assert!(item_slugs(&repo).is_empty());
}

#[test]
fn setting_the_cms_root_reconciles_existing_pages() {
    let dir = tempdir().unwrap();
    let mut repo = Repository::init(dir.path(), PathProfile::Publishing, None).unwrap();
    let engine = CmsViewEngine::attach(&mut repo);
    repo.add_resource(Resource::Database(EditableResource::new(CMS_DB, "Site")))
        .unwrap();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs"], None))
        .unwrap();
    assert!(item_slugs(&repo).is_empty());

    repo.set_cms_database_id(Some(CMS_DB.into())).unwrap();
    assert_eq!(item_slugs(&repo), vec!["", "/docs", "/docs/setup"]);
    assert_eq!(engine.content_tree(&repo).unwrap().len(), 3);

    repo.set_cms_database_id(None).unwrap();
    assert!(item_slugs(&repo).is_empty());
}

#[test]
fn content_tree_is_rebuilt_after_changes() {
    let (_dir, mut repo, engine) = cms_repo();
    repo.add_resource(cms_page("a", "Setup", CmsPageType::Page, &["Docs", "Linux"], Some(1)))
        .unwrap();
    repo.add_resource(cms_page("b", "Intro", CmsPageType::Page, &["Docs"], Some(0)))
        .unwrap();

    let tree = engine.content_tree(&repo).unwrap();
    assert!(engine.is_cached());
    assert_tree_parent_invariant(&tree);

    let docs = tree.find("/docs").unwrap();
    assert_eq!(tree.node_type(docs), NodeType::Book);
    assert_eq!(tree.title(docs), "Docs");
    let linux = tree.find("/docs/linux").unwrap();
    assert_eq!(tree.title(linux), "Linux");
    let intro = tree.find("/docs/intro").unwrap();
    assert_eq!(tree.node_type(intro), NodeType::Page);
    assert_eq!(tree.title(ContentTree::ROOT), "Home");

    // Children sorted by their first content's sequence.
    let order: Vec<&str> = tree
        .node(docs)
        .children
        .iter()
        .map(|c| tree.node(*c).slug.as_str())
        .collect();
    assert_eq!(order, vec!["/docs/intro", "/docs/linux"]);

    repo.remove_resource("b", false).unwrap();
    assert!(!engine.is_cached());
    let tree = engine.content_tree(&repo).unwrap();
    assert!(tree.find("/docs/intro").is_none());
}

fn assert_tree_parent_invariant(tree: &ContentTree) {
    for (_, node) in tree.walk() {
        let Some(parent) = node.parent else {
            assert_eq!(node.slug, "");
            continue;
        };
        let expected = node
            .slug
            .rsplit_once('/')
            .map(|(p, _)| p)
            .unwrap_or("");
        assert_eq!(tree.node(parent).slug, expected);
    }
}
