//! Prompt templates for grading and question generation.
//!
//! Each template spells out the exact JSON shape the response validator
//! expects, so a well-behaved provider never needs repair beyond fence
//! stripping.

use gradeflow_core::{Difficulty, QuestionKey};

/// System prompt for grading calls.
pub const EXAMINER_SYSTEM_PROMPT: &str = "You are an expert examiner. Provide detailed, accurate, \
and constructive feedback. Always respond with valid JSON.";

/// System prompt for question generation calls.
pub const SETTER_SYSTEM_PROMPT: &str =
    "You are an exam question generator. Always respond with valid JSON only.";

/// Shown in place of retrieved context when retrieval found nothing.
const NO_CONTEXT: &str = "(no reference material available; rely on the question and rubric)";

/// Retrieval query used to ground the grading of one answer.
pub fn evaluation_query(question: &str) -> String {
    format!(
        "Question: {}. Provide relevant context and key concepts.",
        question.trim()
    )
}

/// Retrieval query used to ground question generation for a topic.
pub fn generation_query(topic: &str) -> String {
    format!(
        "Provide comprehensive content about {} suitable for exam preparation. \
         Include key concepts, facts, and important details.",
        topic.trim()
    )
}

/// Retrieval query used to find reference material for a concept gap.
pub fn reference_query(concept: &str) -> String {
    format!(
        "Which chapter covers {}? Provide chapter name, pages, and key topics.",
        concept.trim()
    )
}

/// Grading prompt for one subjective answer.
pub fn evaluation_prompt(
    question: &str,
    rubric: &str,
    answer: &str,
    context: &str,
    max_score: u32,
) -> String {
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };

    format!(
        r#"Evaluate the following answer.

Question: {question}

Evaluation Rubric:
{rubric}

Student Answer:
{answer}

Relevant Reference Material:
{context}

Evaluate the answer based on:
1. Structure and organization
2. Factual accuracy (compare with the reference material)
3. Relevance to the question
4. Depth of understanding
5. Use of examples and evidence

Respond with a single JSON object in exactly this format:
{{
  "score": <number between 0 and {max_score}>,
  "strengths": ["strength1", "strength2"],
  "weaknesses": ["weakness1", "weakness2"],
  "concept_gaps": [
    {{
      "concept": "concept name",
      "severity": "high|medium|low",
      "description": "brief description"
    }}
  ],
  "feedback": "constructive feedback in 3-4 sentences",
  "skill_scores": {{
    "factual_recall": <integer 0-100>,
    "analysis": <integer 0-100>,
    "critical_thinking": <integer 0-100>,
    "structure": <integer 0-100>,
    "relevance": <integer 0-100>
  }}
}}"#,
        question = question.trim(),
        rubric = rubric.trim(),
        answer = answer.trim(),
    )
}

fn objective_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "direct recall of basic concepts",
        Difficulty::Medium => "understanding and application of concepts",
        Difficulty::Hard => "analysis, evaluation and synthesis",
    }
}

fn subjective_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "explain or describe",
        Difficulty::Medium => "analyze or compare",
        Difficulty::Hard => "critically evaluate or synthesize",
    }
}

fn content_block(context: &str) -> String {
    if context.trim().is_empty() {
        "(no reference material available; draw on standard curriculum knowledge of the topic)"
            .to_string()
    } else {
        context.to_string()
    }
}

/// Prompt for a batch of multiple-choice questions.
pub fn objective_batch_prompt(key: &QuestionKey, count: usize, context: &str) -> String {
    format!(
        r#"Generate {count} multiple-choice questions based on the following content.

Subject: {subject}
Topic: {topic}
Difficulty: {difficulty} ({guidance})
Number of questions: {count}

Content:
{content}

Requirements:
1. Each question has exactly 4 options labeled A, B, C and D
2. Exactly one option is correct, and "correct_answer" is its label
3. Questions are based strictly on the provided content
4. No two questions ask the same thing

Return ONLY a JSON array in exactly this format:
[
  {{
    "question": "Question text here?",
    "options": {{"A": "Option A", "B": "Option B", "C": "Option C", "D": "Option D"}},
    "correct_answer": "A",
    "source": "Brief reference to the content"
  }}
]"#,
        subject = key.subject,
        topic = key.topic,
        difficulty = key.difficulty,
        guidance = objective_guidance(key.difficulty),
        content = content_block(context),
    )
}

/// Prompt for a batch of descriptive questions.
pub fn subjective_batch_prompt(
    key: &QuestionKey,
    count: usize,
    context: &str,
    allowed_marks: &[u32],
) -> String {
    let marks = if allowed_marks.is_empty() {
        "a positive whole number".to_string()
    } else {
        allowed_marks
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let example_marks = allowed_marks.first().copied().unwrap_or(10);

    format!(
        r#"Generate {count} descriptive (essay-type) questions based on the following content.

Subject: {subject}
Topic: {topic}
Difficulty: {difficulty} (questions ask the candidate to {guidance})
Number of questions: {count}

Content:
{content}

Requirements:
1. Each question requires a detailed written answer
2. "marks" must be one of: {marks}
3. Each question includes an evaluation rubric
4. Questions are based strictly on the provided content

Return ONLY a JSON array in exactly this format:
[
  {{
    "question": "Question text here",
    "marks": {example_marks},
    "rubric": "Evaluation criteria: structure, accuracy, depth, examples",
    "source": "Brief reference to the content"
  }}
]"#,
        subject = key.subject,
        topic = key.topic,
        difficulty = key.difficulty,
        guidance = subjective_guidance(key.difficulty),
        content = content_block(context),
    )
}
