use crate::api::{SamplingParams, TextGenerator};
use crate::error::{PipelineError, Result};
use crate::script::{Scene, Script, parse_draft};
use crate::{logi, logok, logw};
use chrono::Local;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRequest {
    pub topic: String,
    pub duration: u32,
    pub scene_duration: u32,
    pub style: String,
    pub aspect_ratio: String,
}

/// Whole scenes that fit in `total`; the remainder is dropped.
pub fn scene_count(total: u32, per_scene: u32) -> Result<u32> {
    let count = total.checked_div(per_scene).ok_or_else(|| {
        PipelineError::InvalidRequest("scene duration must be greater than zero".to_string())
    })?;
    if count == 0 {
        return Err(PipelineError::InvalidRequest(format!(
            "total duration {}s is shorter than one {}s scene",
            total, per_scene
        )));
    }
    let remainder = total % per_scene;
    if remainder != 0 {
        logw(format!(
            "{}s does not divide into {}s scenes; {} scenes cover {}s ({}s dropped)",
            total,
            per_scene,
            count,
            count * per_scene,
            remainder
        ));
    }
    Ok(count)
}

pub fn build_script_prompt(req: &ScriptRequest, num_scenes: u32) -> String {
    format!(
        r#"Create a video script about "{topic}" with the following requirements.

Technical parameters:
- Total duration: {duration} seconds
- Number of scenes: {num_scenes}
- Duration of each scene: {scene_duration} seconds
- Aspect ratio: {aspect_ratio}
- Style: {style}

Requirements:
1. Split the video into exactly {num_scenes} clearly separated scenes.
2. Every scene needs:
   - a detailed description of the shot (description)
   - a prompt optimized for the VEO 3.1 video model (veo_prompt), focused on motion, camera angle and lighting
   - the camera movement (camera_movement)
   - the time of day (time_of_day)
   - the mood (mood)
3. Each veo_prompt must:
   - be rich in concrete visual elements
   - state the camera movement clearly (pan, zoom, dolly, tracking, ...)
   - cover lighting and mood
   - be 100-200 words of English
   - avoid requests that are too complex for the model

Output format (JSON):
```json
{{
  "title": "Video title",
  "description": "Overall summary",
  "total_duration": {duration},
  "num_scenes": {num_scenes},
  "style": "{style}",
  "scenes": [
    {{
      "scene_number": 1,
      "duration": {scene_duration},
      "description": "What happens in the scene",
      "veo_prompt": "Detailed English prompt optimized for VEO 3.1 with camera movements, lighting, and visual details",
      "camera_movement": "slow pan left",
      "time_of_day": "golden hour",
      "mood": "peaceful"
    }}
  ]
}}
```

Write the complete script in the format above."#,
        topic = req.topic,
        duration = req.duration,
        num_scenes = num_scenes,
        scene_duration = req.scene_duration,
        aspect_ratio = req.aspect_ratio,
        style = req.style,
    )
}

pub fn build_refine_prompt(scene_description: &str, style: &str) -> String {
    format!(
        r#"Convert this scene description into an optimized VEO 3.1 prompt:

Scene: {}
Style: {}

Requirements:
- 100-200 words in English
- Include camera movement details
- Describe lighting and mood
- Focus on visual elements and motion
- Use cinematic terminology
- Optimize for VEO 3.1 capabilities

Output only the prompt, no explanation."#,
        scene_description, style
    )
}

pub struct ScriptGenerator<G> {
    generator: G,
}

impl<G: TextGenerator> ScriptGenerator<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub async fn generate_script(&self, req: &ScriptRequest) -> Result<Script> {
        let num_scenes = scene_count(req.duration, req.scene_duration)?;
        logi(format!(
            "Requesting script for \"{}\" ({}s, {} scenes of {}s, {}, {})",
            req.topic, req.duration, num_scenes, req.scene_duration, req.style, req.aspect_ratio
        ));

        let prompt = build_script_prompt(req, num_scenes);
        let raw = self
            .generator
            .generate(&prompt, Some(SamplingParams::SCRIPT))
            .await?;
        let draft = parse_draft(&raw)?;

        let returned = draft.scenes.len();
        if returned < num_scenes as usize {
            return Err(PipelineError::Parse(format!(
                "expected {} scenes, model returned {}",
                num_scenes, returned
            )));
        }
        if returned > num_scenes as usize {
            logw(format!(
                "Model returned {} scenes; keeping the first {}",
                returned, num_scenes
            ));
        }

        let scenes: Vec<Scene> = draft
            .scenes
            .into_iter()
            .take(num_scenes as usize)
            .zip(1..)
            .map(|(s, scene_number)| Scene {
                scene_number,
                duration: req.scene_duration,
                description: s.description,
                veo_prompt: s.veo_prompt,
                camera_movement: s.camera_movement,
                time_of_day: s.time_of_day,
                mood: s.mood,
            })
            .collect();

        let script = Script {
            title: if draft.title.trim().is_empty() {
                req.topic.clone()
            } else {
                draft.title
            },
            description: draft.description,
            total_duration: req.duration,
            num_scenes,
            style: if draft.style.trim().is_empty() {
                req.style.clone()
            } else {
                draft.style
            },
            aspect_ratio: req.aspect_ratio.clone(),
            created_at: Local::now(),
            scenes,
        };

        logok(format!(
            "Script generated: \"{}\" ({} scenes)",
            script.title,
            script.scenes.len()
        ));
        Ok(script)
    }

    /// Polishes one free-text scene description into a rendering prompt.
    pub async fn refine_scene_prompt(&self, scene_description: &str, style: &str) -> Result<String> {
        let prompt = build_refine_prompt(scene_description, style);
        let text = self.generator.generate(&prompt, None).await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every prompt with a canned response and keeps the prompts.
    pub(crate) struct CannedText {
        pub response: String,
        pub prompts: Mutex<Vec<(String, Option<SamplingParams>)>>,
    }

    impl CannedText {
        pub(crate) fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedText {
        async fn generate(&self, prompt: &str, params: Option<SamplingParams>) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), params));
            Ok(self.response.clone())
        }
    }

    pub(crate) fn draft_json(n: usize) -> String {
        let scenes: Vec<String> = (1..=n)
            .map(|i| {
                format!(
                    r#"{{"scene_number": {i}, "duration": 5, "description": "scene {i}", "veo_prompt": "prompt {i}", "camera_movement": "pan", "time_of_day": "dusk", "mood": "calm"}}"#
                )
            })
            .collect();
        format!(
            r#"{{"title": "Forest", "description": "d", "style": "cinematic", "scenes": [{}]}}"#,
            scenes.join(",")
        )
    }

    fn request(duration: u32, scene_duration: u32) -> ScriptRequest {
        ScriptRequest {
            topic: "X".to_string(),
            duration,
            scene_duration,
            style: "cinematic".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }

    #[test]
    fn scene_count_floors() {
        assert_eq!(scene_count(40, 8).unwrap(), 5);
        assert_eq!(scene_count(60, 8).unwrap(), 7);
        assert_eq!(scene_count(8, 8).unwrap(), 1);
        assert!(matches!(
            scene_count(40, 0),
            Err(PipelineError::InvalidRequest(_))
        ));
        assert!(matches!(
            scene_count(5, 8),
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn prompt_embeds_every_parameter() {
        let prompt = build_script_prompt(&request(40, 8), 5);
        for needle in ["\"X\"", "40 seconds", "Number of scenes: 5", "8 seconds", "16:9", "cinematic", "```json"] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
    }

    #[tokio::test]
    async fn forty_seconds_of_eight_yields_five_scenes() {
        let fake = CannedText::new(format!("```json\n{}\n```", draft_json(5)));
        let generator = ScriptGenerator::new(fake);
        let script = generator.generate_script(&request(40, 8)).await.unwrap();

        assert_eq!(script.scenes.len(), 5);
        assert!(script.scenes.iter().all(|s| s.duration == 8));
        assert_eq!(
            script.scenes.iter().map(|s| s.scene_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(script.num_scenes, 5);
        assert_eq!(script.total_duration, 40);
        assert_eq!(script.aspect_ratio, "16:9");

        let prompts = generator.generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].1, Some(SamplingParams::SCRIPT));
    }

    #[tokio::test]
    async fn extra_scenes_are_truncated_and_missing_ones_fail() {
        let generator = ScriptGenerator::new(CannedText::new(draft_json(7)));
        let script = generator.generate_script(&request(40, 8)).await.unwrap();
        assert_eq!(script.scenes.len(), 5);

        let generator = ScriptGenerator::new(CannedText::new(draft_json(3)));
        assert!(matches!(
            generator.generate_script(&request(40, 8)).await,
            Err(PipelineError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn prose_response_is_a_parse_error() {
        let generator = ScriptGenerator::new(CannedText::new("Sorry, I can't help with that."));
        assert!(matches!(
            generator.generate_script(&request(16, 8)).await,
            Err(PipelineError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn refine_trims_and_uses_service_defaults() {
        let generator = ScriptGenerator::new(CannedText::new("\n  A slow crane shot over rice terraces.  \n"));
        let prompt = generator
            .refine_scene_prompt("ruộng bậc thang lúc bình minh", "documentary")
            .await
            .unwrap();
        assert_eq!(prompt, "A slow crane shot over rice terraces.");

        let prompts = generator.generator.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("ruộng bậc thang"));
        assert!(prompts[0].0.contains("Style: documentary"));
        assert_eq!(prompts[0].1, None);
    }
}
