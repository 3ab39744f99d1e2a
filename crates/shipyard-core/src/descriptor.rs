//! Deployment descriptors: the contract between the build and deploy stages.
//!
//! The build stage writes `imagedefinitions.json`, a JSON array with one
//! `{"name", "imageUri"}` object; the deploy stage reads it back verbatim.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the build stage's output artifact.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Which image to roll out to which service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "imageUri", default)]
    pub image_uri: String,
}

impl ImageDefinition {
    pub fn new(name: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_uri: image_uri.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Deploy("descriptor is missing a name".to_string()));
        }
        if self.image_uri.trim().is_empty() {
            return Err(Error::Deploy(format!(
                "descriptor for {} is missing an imageUri",
                self.name
            )));
        }
        self.image().map(|_| ())
    }

    /// The parsed `imageUri`.
    pub fn image(&self) -> Result<ImageReference> {
        self.image_uri
            .parse()
            .map_err(|e| Error::Deploy(format!("descriptor for {}: {}", self.name, e)))
    }
}

/// The full contents of `imagedefinitions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageDefinitions(pub Vec<ImageDefinition>);

impl ImageDefinitions {
    /// The single-entry list the build stage always emits.
    pub fn single(definition: ImageDefinition) -> Self {
        Self(vec![definition])
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a descriptor file; any defect is a deploy error.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let defs: ImageDefinitions = serde_json::from_slice(data)
            .map_err(|e| Error::Deploy(format!("malformed {}: {}", IMAGE_DEFINITIONS_FILE, e)))?;
        if defs.0.is_empty() {
            return Err(Error::Deploy(format!(
                "{} contains no image definitions",
                IMAGE_DEFINITIONS_FILE
            )));
        }
        for def in &defs.0 {
            def.validate()?;
        }
        Ok(defs)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageDefinition> {
        self.0.iter()
    }
}

/// A `<registry>/<repository>:<tag>` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // The tag separator is the last ':' after the last '/', so registry
        // ports (`host:5000/repo`) are not mistaken for tags.
        if s.contains(char::is_whitespace) {
            return Err(format!("Invalid image reference: {:?}", s));
        }
        let name_start = s.rfind('/').map(|i| i + 1).unwrap_or(0);
        match s[name_start..].rfind(':') {
            Some(idx) => {
                let split = name_start + idx;
                let (repository, tag) = (&s[..split], &s[split + 1..]);
                if repository.is_empty() || tag.is_empty() {
                    return Err(format!("Invalid image reference: {}", s));
                }
                Ok(Self::new(repository, tag))
            }
            None if !s.is_empty() => Ok(Self::new(s, "latest")),
            None => Err("Empty image reference".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_wire_format() {
        let defs = ImageDefinitions::single(ImageDefinition::new(
            "similarity-embeddings-app",
            "repo:latest",
        ));
        let json = String::from_utf8(defs.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"[{"name":"similarity-embeddings-app","imageUri":"repo:latest"}]"#
        );
    }

    #[test]
    fn test_descriptor_read_back_unchanged() {
        let written = ImageDefinitions::single(ImageDefinition::new("svc", "repo:tag"));
        let read = ImageDefinitions::from_json(&written.to_json().unwrap()).unwrap();
        assert_eq!(read, written);
        assert_eq!(read.0[0].name, "svc");
        assert_eq!(read.0[0].image_uri, "repo:tag");
    }

    #[test]
    fn test_malformed_descriptors_are_deploy_errors() {
        for input in [
            &b"not json"[..],
            br#"[]"#,
            br#"[{"imageUri":"repo:tag"}]"#,
            br#"[{"name":"svc"}]"#,
            br#"[{"name":"","imageUri":"repo:tag"}]"#,
            br#"{"name":"svc","imageUri":"repo:tag"}"#,
            br#"[{"name":"svc","imageUri":"repo:"}]"#,
            br#"[{"name":"svc","imageUri":":tag"}]"#,
            br#"[{"name":"svc","imageUri":"repo name:tag"}]"#,
        ] {
            let err = ImageDefinitions::from_json(input).unwrap_err();
            assert!(matches!(err, Error::Deploy(_)), "{:?}", input);
        }
    }

    #[test]
    fn test_image_reference_parsing() {
        let r: ImageReference = "123.dkr.ecr.us-east-1.amazonaws.com/app:abc1234"
            .parse()
            .unwrap();
        assert_eq!(r.repository, "123.dkr.ecr.us-east-1.amazonaws.com/app");
        assert_eq!(r.tag, "abc1234");

        let r: ImageReference = "localhost:5000/app".parse().unwrap();
        assert_eq!(r.repository, "localhost:5000/app");
        assert_eq!(r.tag, "latest");

        assert_eq!(ImageReference::new("repo", "v1").to_string(), "repo:v1");
        assert!("repo:".parse::<ImageReference>().is_err());
    }

    #[test]
    fn test_definition_exposes_parsed_image() {
        let def = ImageDefinition::new("svc", "registry.local:5000/team/app:abc123");
        let image = def.image().unwrap();
        assert_eq!(image.repository, "registry.local:5000/team/app");
        assert_eq!(image.tag, "abc123");
    }
}
