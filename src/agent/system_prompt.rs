//! System prompts for the tool-calling assistant and the C# code generator,
//! plus the completion phrasing the plan protocol relies on.

/// Substrings (matched case-insensitively) that end a running plan.
pub const COMPLETION_MARKERS: &[&str] = &["completed", "complete", "finished", "final step"];

/// True when assistant text announces that the current plan is done.
pub fn is_plan_complete(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct AssistantPromptParams<'a> {
    pub tool_names: Vec<&'a str>,
}

/// Build the system prompt for the fixed-tool assistant
#[allow(clippy::vec_init_then_push)] // clearer with explicit pushes for multi-section content
pub fn build_assistant_prompt(params: AssistantPromptParams) -> String {
    let mut lines = Vec::new();

    lines.push(
        "You are a Revit assistant that helps users create and modify elements in Revit."
            .to_string(),
    );
    lines.push(String::new());

    lines.push("## Instructions".to_string());
    lines.push("- Use the tool descriptions to decide whether a tool can be used.".to_string());
    lines.push(
        "- If the user does not give the information needed for a tool's arguments, \
         use the default values documented in the tool description."
            .to_string(),
    );
    lines.push(
        "- ALWAYS include ALL parameters in tool calls; never send empty arguments.".to_string(),
    );
    lines.push(
        "- If no tool is applicable, respond with \"I don't know my guy\" and nothing else."
            .to_string(),
    );
    lines.push("- Never mention tools or technical details to the user.".to_string());
    lines.push(String::new());

    if !params.tool_names.is_empty() {
        lines.push("## Tools".to_string());
        lines.push(format!("Available tools: {}", params.tool_names.join(", ")));
        lines.push(String::new());
    }

    lines.push("## Multi-step requests".to_string());
    lines.push(
        "Work one step at a time: call exactly one tool per reply, then wait for its result \
         before deciding the next step. Use ids returned by earlier steps (for example a new \
         wall's id when adding a window to it)."
            .to_string(),
    );
    lines.push(
        "When every step is done, reply with a short summary that starts with \"Task completed\". \
         Do not use the words completed, complete, finished or \"final step\" before then."
            .to_string(),
    );

    lines.join("\n")
}

pub struct CodegenPromptParams<'a> {
    pub revit_version: &'a str,
}

/// Method the generated body is compiled into on the Revit side.
pub const EXECUTE_SIGNATURE: &str = "public static string Execute(UIApplication uiapp, Document doc)";

/// Build the system prompt for the C# code generator
pub fn build_codegen_prompt(params: CodegenPromptParams) -> String {
    format!(
        r#"You are a Revit API expert. Generate efficient, concise C# code that accomplishes the user's request.
The code is compiled and executed directly inside Revit {version} by a dynamic code execution add-in.

TARGET:
- Revit API {version} (RevitAPI.dll and RevitAPIUI.dll)
- C# compiled against .NET Framework 4.8

RULES:
1. Generate ONLY the method body, not a class, namespace or using directives.
2. The body runs inside a method with this signature:
   `{signature}`
3. Always return a string; it is what the user sees.
4. Handle errors with try/catch and return the error text.
5. Open and commit your own Transaction for every model change (TransactionMode.Manual).
6. Keep the code as efficient as possible.
7. Do NOT explain the code. Output ONLY code, with no markdown.
8. Common namespaces (System, System.Linq, System.Collections.Generic, Autodesk.Revit.DB,
   Autodesk.Revit.UI) are already imported.
9. Stay compatible with .NET Framework 4.8 and C# 7.3: no $"..." string interpolation,
   no switch expressions, no records, no target-typed new, no using declarations.
   Build strings with string.Format or concatenation.
10. Revit internal units are feet; convert when the user gives metric values.

EXAMPLE 1 - "create a 20 foot wall on Level 1":
Level level = new FilteredElementCollector(doc)
    .OfClass(typeof(Level))
    .Cast<Level>()
    .FirstOrDefault(l => l.Name == "Level 1");
if (level == null) return "Level 1 not found";
using (Transaction tx = new Transaction(doc, "Create wall"))
{{
    tx.Start();
    Line line = Line.CreateBound(new XYZ(0, 0, 0), new XYZ(20, 0, 0));
    Wall wall = Wall.Create(doc, line, level.Id, false);
    tx.Commit();
    return "Created wall " + wall.Id.ToString();
}}

EXAMPLE 2 - "how many doors are there":
int count = new FilteredElementCollector(doc)
    .OfCategory(BuiltInCategory.OST_Doors)
    .WhereElementIsNotElementType()
    .GetElementCount();
return string.Format("The model contains {{0}} doors", count);
"#,
        version = params.revit_version,
        signature = EXECUTE_SIGNATURE,
    )
}

/// Follow-up request sent after Revit reported a compilation or runtime error.
pub fn build_regeneration_prompt(query: &str, previous_code: &str, error: &str) -> String {
    format!(
        "The code you generated for the request below failed in Revit.\n\n\
         Request: {}\n\n\
         Previous code:\n{}\n\n\
         Error reported by Revit:\n{}\n\n\
         Generate corrected C# code for the same request. Follow all the rules; output ONLY code.",
        query, previous_code, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_markers_match_case_insensitively() {
        assert!(is_plan_complete("Step 2 complete."));
        assert!(is_plan_complete("Task COMPLETED: three walls created"));
        assert!(is_plan_complete("All done, finished."));
        assert!(is_plan_complete("This was the Final Step."));
        assert!(!is_plan_complete("Step 2 done."));
        assert!(!is_plan_complete("Now adding the window to wall 311."));
    }

    #[test]
    fn assistant_prompt_lists_tools_and_protocol() {
        let prompt = build_assistant_prompt(AssistantPromptParams {
            tool_names: vec!["create_wall", "get_level_names"],
        });
        assert!(prompt.contains("create_wall, get_level_names"));
        assert!(prompt.contains("I don't know my guy"));
        assert!(prompt.contains("Task completed"));
    }

    #[test]
    fn codegen_prompt_embeds_signature_and_version() {
        let prompt = build_codegen_prompt(CodegenPromptParams {
            revit_version: "2025",
        });
        assert!(prompt.contains(EXECUTE_SIGNATURE));
        assert!(prompt.contains("Revit API 2025"));
        assert!(prompt.contains(".NET Framework 4.8"));
        // Braces in the worked examples survive formatting.
        assert!(prompt.contains("string.Format(\"The model contains {0} doors\""));
    }

    #[test]
    fn regeneration_prompt_carries_all_context() {
        let prompt = build_regeneration_prompt("count walls", "return 1;", "Compilation errors: CS0029");
        assert!(prompt.contains("count walls"));
        assert!(prompt.contains("return 1;"));
        assert!(prompt.contains("CS0029"));
    }
}
