//! Analyzer plugins and the languages they enable.
//!
//! The engine only analyzes languages whose analyzer jar was handed to it in
//! `initialize`. [`discover_plugins`] scans a plugins directory for known
//! analyzer jars and returns both the jar paths and the languages they bring;
//! the server-side counterpart lives in [`crate::plugins`].

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A language the engine can analyze. Serializes to the engine's wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    Ansible,
    Azureresourcemanager,
    Cloudformation,
    Css,
    Docker,
    Go,
    Html,
    Ipython,
    Java,
    Js,
    Jsp,
    Kotlin,
    Kubernetes,
    Php,
    Python,
    Ruby,
    Secrets,
    Terraform,
    Ts,
    Xml,
}

impl Language {
    pub const ALL: [Language; 20] = [
        Language::Ansible,
        Language::Azureresourcemanager,
        Language::Cloudformation,
        Language::Css,
        Language::Docker,
        Language::Go,
        Language::Html,
        Language::Ipython,
        Language::Java,
        Language::Js,
        Language::Jsp,
        Language::Kotlin,
        Language::Kubernetes,
        Language::Php,
        Language::Python,
        Language::Ruby,
        Language::Secrets,
        Language::Terraform,
        Language::Ts,
        Language::Xml,
    ];

    /// The short plugin key users type (`"py"`, `"java"`, `"ts"`, ...).
    pub fn key(self) -> &'static str {
        match self {
            Language::Ansible => "ansible",
            Language::Azureresourcemanager => "azureresourcemanager",
            Language::Cloudformation => "cloudformation",
            Language::Css => "css",
            Language::Docker => "docker",
            Language::Go => "go",
            Language::Html => "web",
            Language::Ipython => "ipynb",
            Language::Java => "java",
            Language::Js => "js",
            Language::Jsp => "jsp",
            Language::Kotlin => "kotlin",
            Language::Kubernetes => "kubernetes",
            Language::Php => "php",
            Language::Python => "py",
            Language::Ruby => "ruby",
            Language::Secrets => "secrets",
            Language::Terraform => "terraform",
            Language::Ts => "ts",
            Language::Xml => "xml",
        }
    }

    /// Suffix given to temporary files holding a snippet in this language.
    pub fn default_suffix(self) -> &'static str {
        match self {
            Language::Ansible => ".yml",
            Language::Azureresourcemanager => ".bicep",
            Language::Cloudformation | Language::Kubernetes => ".yaml",
            Language::Css => ".css",
            Language::Docker => ".dockerfile",
            Language::Go => ".go",
            Language::Html => ".html",
            Language::Ipython => ".ipynb",
            Language::Java => ".java",
            Language::Js => ".js",
            Language::Jsp => ".jsp",
            Language::Kotlin => ".kt",
            Language::Php => ".php",
            Language::Python => ".py",
            Language::Ruby => ".rb",
            Language::Secrets => ".txt",
            Language::Terraform => ".tf",
            Language::Ts => ".ts",
            Language::Xml => ".xml",
        }
    }

    /// Look a language up by plugin key or by name, ignoring case.
    pub fn from_input(input: &str) -> Option<Language> {
        let input = input.trim();
        Language::ALL.into_iter().find(|lang| {
            lang.key().eq_ignore_ascii_case(input) || lang.wire_name().eq_ignore_ascii_case(input)
        })
    }

    fn wire_name(self) -> &'static str {
        match self {
            Language::Ansible => "ANSIBLE",
            Language::Azureresourcemanager => "AZURERESOURCEMANAGER",
            Language::Cloudformation => "CLOUDFORMATION",
            Language::Css => "CSS",
            Language::Docker => "DOCKER",
            Language::Go => "GO",
            Language::Html => "HTML",
            Language::Ipython => "IPYTHON",
            Language::Java => "JAVA",
            Language::Js => "JS",
            Language::Jsp => "JSP",
            Language::Kotlin => "KOTLIN",
            Language::Kubernetes => "KUBERNETES",
            Language::Php => "PHP",
            Language::Python => "PYTHON",
            Language::Ruby => "RUBY",
            Language::Secrets => "SECRETS",
            Language::Terraform => "TERRAFORM",
            Language::Ts => "TS",
            Language::Xml => "XML",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A known analyzer plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Analyzer {
    /// Plugin key as reported by `api/plugins/installed`.
    pub key: &'static str,
    /// Name contained in the analyzer's jar file name.
    pub jar: &'static str,
    pub languages: &'static [Language],
}

pub const ANALYZERS: &[Analyzer] = &[
    Analyzer {
        key: "kotlin",
        jar: "sonar-kotlin-plugin",
        languages: &[Language::Kotlin],
    },
    Analyzer {
        key: "java",
        jar: "sonar-java-plugin",
        languages: &[Language::Java],
    },
    Analyzer {
        key: "iac",
        jar: "sonar-iac-plugin",
        languages: &[
            Language::Cloudformation,
            Language::Kubernetes,
            Language::Terraform,
            Language::Azureresourcemanager,
            Language::Ansible,
            Language::Docker,
        ],
    },
    Analyzer {
        key: "python",
        jar: "sonar-python-plugin",
        languages: &[Language::Python, Language::Ipython],
    },
    Analyzer {
        key: "ruby",
        jar: "sonar-ruby-plugin",
        languages: &[Language::Ruby],
    },
    Analyzer {
        key: "javasymbolicexecution",
        jar: "sonar-java-symbolic-execution-plugin",
        languages: &[],
    },
    Analyzer {
        key: "go",
        jar: "sonar-go-plugin",
        languages: &[Language::Go],
    },
    Analyzer {
        key: "javascript",
        jar: "sonar-javascript-plugin",
        languages: &[Language::Js, Language::Ts, Language::Jsp],
    },
    Analyzer {
        key: "text",
        jar: "sonar-text-plugin",
        languages: &[Language::Secrets],
    },
    Analyzer {
        key: "php",
        jar: "sonar-php-plugin",
        languages: &[Language::Php],
    },
    Analyzer {
        key: "xml",
        jar: "sonar-xml-plugin",
        languages: &[Language::Xml],
    },
    Analyzer {
        key: "web",
        jar: "sonar-html-plugin",
        languages: &[Language::Html, Language::Css],
    },
];

impl Analyzer {
    /// The analyzer a server plugin key refers to.
    pub fn by_key(key: &str) -> Option<&'static Analyzer> {
        ANALYZERS.iter().find(|a| a.key == key)
    }

    /// The analyzer whose jar name `file_name` contains. When several
    /// match, the longest name wins, so that
    /// `sonar-java-symbolic-execution-plugin-*.jar` is not taken for the
    /// Java analyzer.
    pub fn by_file_name(file_name: &str) -> Option<&'static Analyzer> {
        ANALYZERS
            .iter()
            .filter(|a| file_name.contains(a.jar))
            .max_by_key(|a| a.jar.len())
    }
}

/// Every language some known analyzer can enable.
pub fn supported_languages() -> BTreeSet<Language> {
    ANALYZERS
        .iter()
        .flat_map(|a| a.languages.iter().copied())
        .collect()
}

/// Analyzer jars and the languages they enable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSet {
    pub paths: BTreeSet<PathBuf>,
    pub languages: BTreeSet<Language>,
}

impl PluginSet {
    pub fn insert(&mut self, path: PathBuf, analyzer: &Analyzer) {
        self.languages.extend(analyzer.languages.iter().copied());
        self.paths.insert(path);
    }
}

/// Scan `dir` (non-recursively) for known analyzer jars. Unknown jars are
/// skipped with a warning.
pub async fn discover_plugins(dir: &Path) -> io::Result<PluginSet> {
    let mut set = PluginSet::default();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".jar") || !entry.file_type().await?.is_file() {
            continue;
        }

        match Analyzer::by_file_name(file_name) {
            Some(analyzer) => {
                debug!(analyzer = analyzer.key, path = %path.display(), "Found analyzer plugin");
                set.insert(path, analyzer);
            }
            None => warn!(path = %path.display(), "Ignoring unknown plugin jar"),
        }
    }
    Ok(set)
}
