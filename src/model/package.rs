use serde::{Deserialize, Serialize};

/// Package ecosystem of a descriptor and the components it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Npm,
    Yarn,
    Maven,
    Gradle,
    Pip,
    Pypi,
    Go,
    Nuget,
    Terraform,
    Unknown,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Npm => "npm",
            PackageType::Yarn => "yarn",
            PackageType::Maven => "maven",
            PackageType::Gradle => "gradle",
            PackageType::Pip => "pip",
            PackageType::Pypi => "pypi",
            PackageType::Go => "go",
            PackageType::Nuget => "nuget",
            PackageType::Terraform => "terraform",
            PackageType::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PackageType::Npm => "npm",
            PackageType::Yarn => "Yarn",
            PackageType::Maven => "Maven",
            PackageType::Gradle => "Gradle",
            PackageType::Pip => "pip",
            PackageType::Pypi => "PyPI",
            PackageType::Go => "Go",
            PackageType::Nuget => "NuGet",
            PackageType::Terraform => "Terraform",
            PackageType::Unknown => "Unknown",
        }
    }

    /// Maps a descriptor file name to the ecosystem that owns it.
    pub fn from_descriptor_name(file_name: &str) -> Option<Self> {
        match file_name {
            "package.json" => Some(PackageType::Npm),
            "yarn.lock" => Some(PackageType::Yarn),
            "pom.xml" => Some(PackageType::Maven),
            "build.gradle" | "build.gradle.kts" => Some(PackageType::Gradle),
            "requirements.txt" => Some(PackageType::Pip),
            "setup.py" | "pyproject.toml" => Some(PackageType::Pypi),
            "go.mod" => Some(PackageType::Go),
            name if name.ends_with(".csproj") || name == "packages.config" => {
                Some(PackageType::Nuget)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
