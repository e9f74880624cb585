//! Path based selections over a [`FileReferenceList`].
//!
//! Bilby writes its outputs into a fixed layout: plots under `data/` and
//! `result/`, the resolved configuration as `*_config_complete.ini`, and the
//! posterior as `*result.json` (or `*merge_result.json` for merged runs).

use camino::Utf8Path;

use crate::file_reference::{FileReference, FileReferenceList};

fn base_dir(path: &Utf8Path) -> Option<&str> {
    // a bare file name has no base directory
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .and_then(|_| path.components().next())
        .map(|component| component.as_str())
}

fn suffix(path: &Utf8Path) -> Option<&str> {
    path.extension()
}

fn name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or_default()
}

fn is_png(path: &Utf8Path) -> bool {
    suffix(path) == Some("png")
}

fn in_data_dir(path: &Utf8Path) -> bool {
    base_dir(path) == Some("data")
}

fn in_result_dir(path: &Utf8Path) -> bool {
    base_dir(path) == Some("result")
}

fn is_index_html(path: &Utf8Path) -> bool {
    path.as_str() == "index.html"
}

fn is_config(path: &Utf8Path) -> bool {
    name(path).ends_with("_config_complete.ini")
}

fn is_merged_json(path: &Utf8Path) -> bool {
    name(path).ends_with("merge_result.json")
}

fn is_unmerged_json(path: &Utf8Path) -> bool {
    name(path).ends_with("result.json") && !is_merged_json(path)
}

fn is_corner_plot(path: &Utf8Path) -> bool {
    is_png(path) && path.file_stem().is_some_and(|stem| stem.ends_with("_corner"))
}

/// The files shown on a job's result page: data and result plots, the index
/// page, the completed config and the result JSON. Merged results replace the
/// per-run ones when the job produced any.
pub fn default_filter(files: &FileReferenceList) -> FileReferenceList {
    let has_merged = files
        .iter()
        .any(|file| in_result_dir(file.path()) && is_merged_json(file.path()));
    let result_json = |path: &Utf8Path| {
        in_result_dir(path)
            && if has_merged {
                is_merged_json(path)
            } else {
                is_unmerged_json(path)
            }
    };

    files.filter_list(|file| {
        let path = file.path();
        ((in_data_dir(path) || in_result_dir(path)) && is_png(path))
            || is_index_html(path)
            || is_config(path)
            || result_json(path)
    })
}

pub fn png_filter(files: &FileReferenceList) -> FileReferenceList {
    files.filter_list(|file| is_png(file.path()))
}

pub fn config_filter(files: &FileReferenceList) -> FileReferenceList {
    files.filter_list(|file| is_config(file.path()))
}

pub fn corner_plot_filter(files: &FileReferenceList) -> FileReferenceList {
    files.filter_list(|file| is_corner_plot(file.path()))
}

/// Keeps files matching every supplied criterion: `directory` must be a
/// leading part of the file's directory, `name` the file stem and
/// `extension` the suffix (with or without the dot).
pub fn custom_path_filter(
    files: &FileReferenceList,
    directory: Option<&str>,
    name: Option<&str>,
    extension: Option<&str>,
) -> FileReferenceList {
    files.filter_list(|file| {
        let path = file.path();
        let directory_matches = directory.is_none_or(|directory| {
            path.parent()
                .is_some_and(|parent| parent.starts_with(directory.trim_end_matches('/')))
        });
        let name_matches = name.is_none_or(|name| path.file_stem() == Some(name));
        let extension_matches = extension
            .is_none_or(|extension| path.extension() == Some(extension.trim_start_matches('.')));
        directory_matches && name_matches && extension_matches
    })
}

pub fn sort_file_list(files: &FileReferenceList) -> FileReferenceList {
    let mut sorted: Vec<FileReference> = files.iter().cloned().collect();
    sorted.sort_by(|left, right| left.path().cmp(right.path()));
    FileReferenceList::from(sorted)
}
