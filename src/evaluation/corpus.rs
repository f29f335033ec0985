use uuid::Uuid;

use crate::db::{StoreResult, SubmissionStore};

/// Texts of every other non-empty submission to the same assignment, in
/// creation order. Used as the plagiarism baseline for `exclude_id`.
pub async fn assemble_corpus(
    store: &dyn SubmissionStore,
    assignment_id: Uuid,
    exclude_id: Uuid,
) -> StoreResult<Vec<String>> {
    let entries = store
        .list_by_assignment(assignment_id, exclude_id, true)
        .await?;

    Ok(entries.into_iter().map(|entry| entry.text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, NewAssignment, NewSubmission};

    #[tokio::test]
    async fn excludes_self_empty_texts_and_other_assignments() {
        let store = MemoryStore::new();
        let mut assignments = Vec::new();
        for title in ["Essay", "Lab"] {
            assignments.push(
                store
                    .create_assignment(NewAssignment {
                        title: title.to_string(),
                        description: String::new(),
                        keywords: vec![],
                        max_score: 100.0,
                    })
                    .await
                    .unwrap(),
            );
        }

        let mut ids = Vec::new();
        for (assignment, text) in [
            (&assignments[0], "foo"),
            (&assignments[0], ""),
            (&assignments[0], "bar"),
            (&assignments[1], "baz"),
        ] {
            let submission = store
                .create_submission(NewSubmission {
                    assignment_id: assignment.id,
                    student_id: Uuid::new_v4(),
                    text_content: text.to_string(),
                    file_url: None,
                    file_name: None,
                })
                .await
                .unwrap();
            ids.push(submission.id);
        }

        let corpus = assemble_corpus(&store, assignments[0].id, ids[0]).await.unwrap();
        assert_eq!(corpus, vec!["bar".to_string()]);
    }

    #[tokio::test]
    async fn lone_submission_has_empty_corpus() {
        let store = MemoryStore::new();
        let assignment = store
            .create_assignment(NewAssignment {
                title: "Essay".to_string(),
                description: String::new(),
                keywords: vec![],
                max_score: 100.0,
            })
            .await
            .unwrap();
        let only = store
            .create_submission(NewSubmission {
                assignment_id: assignment.id,
                student_id: Uuid::new_v4(),
                text_content: "alone".to_string(),
                file_url: None,
                file_name: None,
            })
            .await
            .unwrap();

        let corpus = assemble_corpus(&store, assignment.id, only.id).await.unwrap();
        assert!(corpus.is_empty());
    }
}
