use util::{HashMap, HashSet, Hasher};

const TASKS_HEADER: &str = "[tasks]";
const FILES_HEADER: &str = "[files]";
const BLOCK_END: &str = "--";
const PYCODE_BEGIN: &str = "--pycode-begin--";
const PYCODE_END: &str = "--pycode-end--";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid task specifier \"{specifier}\" while resolving task \"{task}\": '{line}'")]
    MalformedTaskGuard {
        task: String,
        specifier: String,
        line: String,
    },
}

/// Task declarations found in the `[tasks]` section of a config.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskDecls {
    /// Task names in order of first appearance (duplicates are kept).
    pub names: Vec<String>,
    /// Every token declared on a task's line, including the task name itself.
    pub tags: HashMap<String, Vec<String>>,
    /// Every token seen in the section, in declaration order, duplicates included.
    pub all_tags: Vec<String>,
}

/// Scan the `[tasks]` section of `lines` for task declarations.
pub fn extract_tasks<I, S>(lines: I) -> TaskDecls
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut decls = TaskDecls::default();
    let mut in_tasks = false;

    for line in lines {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        if line == TASKS_HEADER {
            in_tasks = true;
            continue;
        }
        if line.starts_with('[') {
            in_tasks = false;
        }
        if !in_tasks || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if let Some(name) = tokens.first() {
            decls.names.push(name.clone());
            decls.all_tags.extend(tokens.iter().cloned());
            decls.tags.insert(name.clone(), tokens);
        }
    }

    log::trace!(
        "extracted {} tasks with {} tags",
        decls.names.len(),
        decls.all_tags.len()
    );
    decls
}

/// Resolve `lines` for `task`, whose active tags are `active`.
///
/// `vocabulary` is every tag declared anywhere in the config; guards are tested
/// against it in order and the first matching tag wins. Pass an empty `task`
/// and no active tags to resolve a config without tasks.
pub fn resolve<S: AsRef<str>>(
    lines: &[S],
    task: &str,
    active: &[String],
    vocabulary: &[String],
) -> Result<Vec<String>, Error> {
    let mut resolved = Vec::with_capacity(lines.len());

    let mut in_tasks = false;
    let mut in_pycode = false;
    // Some(skip) while inside a block opened by a bare `tag:` guard:
    let mut block: Option<bool> = None;

    for raw in lines {
        let mut line = raw.as_ref().trim_end_matches(['\r', '\n']);

        if in_tasks && line.starts_with('[') {
            in_tasks = false;
        }

        if block.is_some() && line == BLOCK_END {
            block = None;
            continue;
        }

        let mut guarded = false;
        let mut skip_line = false;
        for tag in vocabulary {
            let (rest, matched) = if let Some(rest) = strip_guard(line, tag) {
                (rest, is_active(active, tag))
            } else if let Some(rest) = line.strip_prefix('~').and_then(|l| strip_guard(l, tag)) {
                (rest, !is_active(active, tag))
            } else {
                continue;
            };

            line = rest.trim_start();
            if line.is_empty() {
                block = Some(!matched);
                skip_line = true;
            } else {
                skip_line = !matched;
            }
            guarded = true;
            break;
        }

        if !guarded && !vocabulary.is_empty() {
            if let Some(specifier) = malformed_guard(line) {
                return Err(Error::MalformedTaskGuard {
                    task: task.to_owned(),
                    specifier: specifier.to_owned(),
                    line: raw.as_ref().to_owned(),
                });
            }
        }

        if skip_line || block == Some(true) || in_tasks {
            continue;
        }

        match line {
            TASKS_HEADER => in_tasks = true,
            PYCODE_BEGIN => in_pycode = true,
            PYCODE_END => in_pycode = false,
            _ if in_pycode => {}
            _ => resolved.push(line.trim_end().to_owned()),
        }
    }

    Ok(resolved)
}

/// Collect the non-blank lines of every `[files]` section in `resolved`.
pub fn files_section<S: AsRef<str>>(resolved: &[S]) -> Vec<String> {
    let mut files = Vec::with_capacity(8);
    let mut in_files = false;
    for line in resolved {
        let line = line.as_ref();
        if line == FILES_HEADER {
            in_files = true;
        } else if line.starts_with('[') || line == BLOCK_END {
            in_files = false;
        } else if in_files {
            let line = line.trim();
            if !line.is_empty() {
                files.push(line.to_owned());
            }
        }
    }
    files
}

/// `line` with a leading `tag:` removed, if it has one.
fn strip_guard<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag)?.strip_prefix(':')
}

fn is_active(active: &[String], tag: &str) -> bool {
    active.iter().any(|t| t == tag)
}

/// A line whose first token looks like a guard (`word:` at the very start of the line).
fn malformed_guard(line: &str) -> Option<&str> {
    let first = line.split_whitespace().next()?;
    (line.starts_with(first) && first.ends_with(':')).then_some(first)
}

/// Configuration for one task: the resolved lines and the declared input files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub lines: Vec<String>,
    pub files: Vec<String>,
}

impl ResolvedConfig {
    /// Resolved lines joined back into config text.
    pub fn content(&self) -> String {
        let mut content = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            content.push_str(line);
            content.push('\n');
        }
        content
    }
}

/// The raw text of a project file together with its task declarations.
#[derive(Debug, Default, Clone)]
pub struct SbyConfig {
    lines: Vec<String>,
    decls: TaskDecls,
}

impl SbyConfig {
    /// Split `text` into lines and extract its task declarations.
    /// Malformed guards are only detected later, by `resolve`.
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();
        let decls = extract_tasks(&lines);
        Self { lines, decls }
    }

    /// Declared task names, in file order.
    pub fn tasks(&self) -> &[String] {
        &self.decls.names
    }

    pub fn has_tasks(&self) -> bool {
        !self.decls.names.is_empty()
    }

    /// Every tag token in declaration order, duplicates included.
    pub fn all_tags(&self) -> &[String] {
        &self.decls.all_tags
    }

    /// The distinct set of declared tags.
    pub fn tag_vocabulary(&self) -> HashSet<&str> {
        let mut set = HashSet::with_capacity_and_hasher(self.decls.all_tags.len(), Hasher::default());
        set.extend(self.decls.all_tags.iter().map(String::as_str));
        set
    }

    /// Tags active for `task`; empty for unknown tasks and for the no-task pseudo-task.
    pub fn tags(&self, task: &str) -> &[String] {
        self.decls.tags.get(task).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve the config for `task` ("" for a config without tasks).
    pub fn resolve(&self, task: &str) -> Result<Vec<String>, Error> {
        resolve(&self.lines, task, self.tags(task), &self.decls.all_tags)
    }

    /// Resolve the config for `task` and pick out its input files.
    pub fn resolve_task(&self, task: &str) -> Result<ResolvedConfig, Error> {
        let lines = self.resolve(task)?;
        let files = files_section(&lines);
        Ok(ResolvedConfig { lines, files })
    }

    /// Resolved config text for `task`.
    pub fn config_content(&self, task: &str) -> Result<String, Error> {
        Ok(self.resolve_task(task)?.content())
    }

    /// Declared input files for `task`.
    pub fn config_files(&self, task: &str) -> Result<Vec<String>, Error> {
        Ok(self.resolve_task(task)?.files)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;

    const DEMO: &str = "\
[options]
mode bmc
depth 100

[engines]
smtbmc

[script]
read -formal demo.sv
prep -top demo

[files]
demo.sv
";

    const TWO_TASKS: &str = "\
[tasks]
prf
cvr

[options]
prf: mode prove
prf: depth  5
cvr: mode cover
cvr: depth 60

[engines]
smtbmc

[script]
read -formal -DPFCACHE fwb_master.v
read -formal -DPFCACHE pfcache.v
prep -top pfcache

[files]
../../rtl/core/pfcache.v
../../rtl/ex/fwb_master.v
";

    const MULTI_TAG: &str = "\
[tasks]
full\t\tsystem  lock    dualread
full_single\tsystem  lock
bare\t\tnolocal lock    dualread
nolock_nolocal\tnolocal nolock  dualread
nolock_system\tsystem  nolock  dualread
piped\t\tsystem\tlock    dualread
cover           system lock     dualread
cover_pipe      system lock     dualread cover piped

[options]
~cover: mode prove
cover:  mode cover
depth 16
full:           depth 10
bare:           depth 11
nolock_nolocal: depth 11
nolock_system:  depth 11
piped:          depth 11
cover:          depth 24
cover_pipe:     depth 45

[engines]
# smtbmc yices
smtbmc --nopresat boolector
# abc pdr

[script]
read -formal -D DCACHE dcache.v
piped:\t\tchparam -set OPT_PIPE      1 dcache
~piped:\t\tchparam -set OPT_PIPE      0 dcache
prep -top dcache

[files]
../../rtl/core/dcache.v
../../rtl/ex/fwb_master.v
#
";

    #[test]
    fn test_empty() -> Result<()> {
        let cfg = SbyConfig::parse("");
        assert!(cfg.tasks().is_empty());
        assert!(cfg.all_tags().is_empty());
        assert!(cfg.resolve("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_no_tasks() -> Result<()> {
        let cfg = SbyConfig::parse(DEMO);
        assert!(cfg.tasks().is_empty());
        assert!(cfg.all_tags().is_empty());
        assert_eq!(cfg.config_files("")?, vec!["demo.sv"]);
        // nothing to filter, so every line survives (trailing blank lines included):
        assert_eq!(cfg.resolve("")?.len(), DEMO.lines().count());
        Ok(())
    }

    #[test]
    fn test_two_tasks() -> Result<()> {
        let cfg = SbyConfig::parse(TWO_TASKS);
        assert_eq!(cfg.tasks(), ["prf", "cvr"]);
        assert_eq!(cfg.all_tags().len(), 2);
        assert_eq!(cfg.tags("prf"), ["prf"]);
        assert_eq!(cfg.tags("cvr"), ["cvr"]);

        let prf = cfg.resolve("prf")?;
        assert!(prf.iter().any(|l| l == "mode prove"));
        assert!(prf.iter().any(|l| l == "depth  5"));
        assert!(!prf.iter().any(|l| l == "mode cover"));

        let cvr = cfg.resolve("cvr")?;
        assert!(cvr.iter().any(|l| l == "mode cover"));
        assert!(!cvr.iter().any(|l| l == "mode prove"));

        // the [tasks] section never reaches the resolved output:
        assert!(!prf.iter().any(|l| l == "[tasks]" || l == "prf" || l == "cvr"));
        assert_eq!(prf.first().map(String::as_str), Some("[options]"));

        assert_eq!(
            cfg.config_files("prf")?,
            vec!["../../rtl/core/pfcache.v", "../../rtl/ex/fwb_master.v"]
        );
        Ok(())
    }

    #[test]
    fn test_multi_tag() -> Result<()> {
        let cfg = SbyConfig::parse(MULTI_TAG);
        assert_eq!(cfg.tasks().len(), 8);
        assert_eq!(cfg.all_tags().len(), 33);
        assert_eq!(cfg.tag_vocabulary().len(), 13);
        assert_eq!(cfg.tags("full").len(), 4);
        assert_eq!(cfg.tags("full_single").len(), 3);
        assert_eq!(cfg.tags("cover_pipe").len(), 6);

        let cover_pipe = cfg.resolve("cover_pipe")?;
        assert!(cover_pipe.iter().any(|l| l == "mode cover"));
        assert!(!cover_pipe.iter().any(|l| l == "mode prove"));
        assert!(cover_pipe.iter().any(|l| l == "depth 45"));
        assert!(cover_pipe.iter().any(|l| l == "chparam -set OPT_PIPE      1 dcache"));

        let full = cfg.resolve("full")?;
        assert!(full.iter().any(|l| l == "mode prove"));
        assert!(full.iter().any(|l| l == "depth 10"));
        assert!(!full.iter().any(|l| l == "depth 45"));
        assert!(full.iter().any(|l| l == "chparam -set OPT_PIPE      0 dcache"));

        // comment lines outside [tasks] are ordinary lines, so "#" is a "file":
        assert_eq!(cfg.config_files("full")?.last().map(String::as_str), Some("#"));
        Ok(())
    }

    #[test]
    fn test_extract_ignores_comments_and_other_sections() {
        let decls = extract_tasks(["[options]", "a b", "[tasks]", "# x y", "t1 a", "", "[script]", "t2"]);
        assert_eq!(decls.names, ["t1"]);
        assert_eq!(decls.all_tags, ["t1", "a"]);
    }

    #[test]
    fn test_duplicate_task_names_kept() {
        let decls = extract_tasks(["[tasks]", "a x", "a y"]);
        assert_eq!(decls.names, ["a", "a"]);
        assert_eq!(decls.tags["a"], ["a", "y"]);
    }

    #[test]
    fn test_block_guard() -> Result<()> {
        let text = "[tasks]\na\nb\n[options]\na:\nmode prove\ndepth 5\n--\nb:\nmode cover\n--\ntail\n";
        let cfg = SbyConfig::parse(text);
        assert_eq!(cfg.resolve("a")?, ["[options]", "mode prove", "depth 5", "tail"]);
        assert_eq!(cfg.resolve("b")?, ["[options]", "mode cover", "tail"]);
        Ok(())
    }

    #[test]
    fn test_negated_block_guard() -> Result<()> {
        let text = "[tasks]\na\nb\n[options]\n~a:\nonly b\n--\n";
        let cfg = SbyConfig::parse(text);
        assert_eq!(cfg.resolve("a")?, ["[options]"]);
        assert_eq!(cfg.resolve("b")?, ["[options]", "only b"]);
        Ok(())
    }

    #[test]
    fn test_malformed_guard() {
        let cfg = SbyConfig::parse("[tasks]\nprf\n[options]\nprv: mode prove\n");
        match cfg.resolve("prf") {
            Err(Error::MalformedTaskGuard { task, specifier, .. }) => {
                assert_eq!(task, "prf");
                assert_eq!(specifier, "prv:");
            }
            other => panic!("expected malformed guard error, got {other:?}"),
        }
        // without any declared tags, the same line is harmless:
        assert!(SbyConfig::parse("[options]\nprv: mode prove\n").resolve("").is_ok());
        // indented lines aren't guards:
        assert!(SbyConfig::parse("[tasks]\nprf\n[script]\n  prv: x\n").resolve("prf").is_ok());
    }

    #[test]
    fn test_pycode_region_dropped() -> Result<()> {
        let text = "[options]\nmode bmc\n--pycode-begin--\noutput(\"depth 4\")\n--pycode-end--\ndepth 2\n";
        assert_eq!(
            SbyConfig::parse(text).resolve("")?,
            ["[options]", "mode bmc", "depth 2"]
        );
        Ok(())
    }

    #[test]
    fn test_resolve_trims_line_endings() -> Result<()> {
        let text = "[files]\r\ndemo.sv  \r\n";
        let cfg = SbyConfig::parse(text);
        assert_eq!(cfg.resolve("")?, ["[files]", "demo.sv"]);
        Ok(())
    }

    #[test]
    fn test_resolve_is_idempotent() -> Result<()> {
        let cfg = SbyConfig::parse(MULTI_TAG);
        for task in cfg.tasks() {
            assert_eq!(cfg.resolve(task)?, cfg.resolve(task)?);
        }
        Ok(())
    }

    #[test]
    fn test_files_section() {
        let lines = [
            "[files]", "a.v", "", "  b.v  ", "a.v", "[script]", "c.v", "[files]", "d.v", "--", "e.v",
        ];
        assert_eq!(files_section(&lines), ["a.v", "b.v", "a.v", "d.v"]);
    }

    #[test]
    fn test_content() -> Result<()> {
        let cfg = SbyConfig::parse("[tasks]\nt\n[options]\nt: mode prove\n");
        assert_eq!(cfg.config_content("t")?, "[options]\nmode prove\n");
        Ok(())
    }
}
