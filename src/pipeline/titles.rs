//! Phase 1: unit titles and course metadata.

use crate::cleanup::{clean_description, clean_title, dedupe_titles};
use crate::error::{PipelineError, Result};
use crate::generation::schema::{self, CourseMetaResponse, TitlesResponse};
use crate::generation::{GenerationClient, Material};
use crate::models::UnitOutline;

const TITLES_SYSTEM: &str = "You design progressive courses from learner-supplied material. \
Each unit builds on the previous one. Return bare titles without numbering, prefixes or \
difficulty labels.";

const META_SYSTEM: &str = "You name courses. Return a short, specific course title and a \
one or two sentence description.";

#[derive(Debug, Clone, PartialEq)]
pub struct CourseMetadata {
    pub title: String,
    pub description: String,
}

fn titles_prompt(material: &Material, unit_count: usize, existing: &[String]) -> String {
    let mut prompt = format!(
        "Create exactly {unit_count} unit titles and exactly {unit_count} matching one-sentence \
         descriptions for a course built from the material below. Order them from introductory \
         to advanced."
    );
    if !existing.is_empty() {
        prompt.push_str("\n\nThe course already has these units, in order. Continue the progression \
                         after them without repeating their topics:\n");
        for (i, t) in existing.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, t));
        }
    }
    if !material.text.is_empty() {
        prompt.push_str("\n\nMaterial:\n");
        prompt.push_str(&material.text);
    }
    prompt
}

/// Check counts, clean, and make titles unique within the course, `existing` included.
/// Any count mismatch is fatal.
pub fn outlines_from_response(
    resp: TitlesResponse,
    unit_count: usize,
    existing: &[String],
) -> Result<Vec<UnitOutline>> {
    if resp.titles.len() != unit_count || resp.descriptions.len() != unit_count {
        return Err(PipelineError::validation(format!(
            "expected {unit_count} titles and descriptions, got {} and {}",
            resp.titles.len(),
            resp.descriptions.len()
        )));
    }
    let titles: Vec<String> = resp.titles.iter().map(|t| clean_title(t)).collect();
    if let Some(pos) = titles.iter().position(String::is_empty) {
        return Err(PipelineError::validation(format!(
            "unit title {} is empty after cleanup ({:?})",
            pos + 1,
            resp.titles[pos]
        )));
    }
    let mut all = existing.to_vec();
    all.extend(titles);
    Ok(dedupe_titles(all)
        .into_iter()
        .skip(existing.len())
        .zip(resp.descriptions.iter())
        .map(|(title, d)| UnitOutline {
            title,
            description: clean_description(d),
        })
        .collect())
}

pub async fn generate_unit_outlines(
    client: &GenerationClient,
    material: &Material,
    unit_count: usize,
    existing: &[String],
) -> Result<Vec<UnitOutline>> {
    let request = client.build_request(
        TITLES_SYSTEM,
        titles_prompt(material, unit_count, existing),
        Some(material),
        schema::titles_schema(),
    );
    let resp: TitlesResponse = client.generate(request).await?;
    outlines_from_response(resp, unit_count, existing)
}

/// Course title and description, seeded by the first unit's title.
pub async fn generate_course_metadata(
    client: &GenerationClient,
    first_unit_title: &str,
    unit_titles: &[String],
) -> Result<CourseMetadata> {
    let prompt = format!(
        "The first unit of a new course is titled \"{first_unit_title}\". The course covers: {}. \
         Write the course title and description.",
        unit_titles.join("; ")
    );
    let request = client.build_request(META_SYSTEM, prompt, None, schema::course_meta_schema());
    let resp: CourseMetaResponse = client.generate(request).await?;

    let title = clean_title(&resp.title);
    let title = if title.is_empty() {
        first_unit_title.to_string()
    } else {
        title
    };
    Ok(CourseMetadata {
        title,
        description: clean_description(&resp.description),
    })
}
