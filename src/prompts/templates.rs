//! Built-in prompt texts.
//!
//! One constant per collaborator query. Conventions shared by all of them:
//! every context value is inserted as a pre-formatted string (lists are
//! joined by the caller), and every structured query spells out the exact
//! JSON shape it expects with lowercase keys, because responses are
//! lowercased before parsing.

// =============================================================================
// Variable elicitation
// =============================================================================

pub const OPERATIONALIZE_OUTCOME: &str = r#"You are a social scientist designing a simulation experiment for this scenario: {{ scenario }}.
The people participating are: {{ agents }}.
The outcome of interest is "{{ variable }}". Propose a concrete, measurable operationalization of this outcome for the experiment.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"variable": "the outcome restated as a short noun phrase", "operationalization": "how the outcome will be concretely measured", "explanation": "short explanation"}"#;

pub const OPERATIONALIZE_CAUSE: &str = r#"You are a social scientist designing a simulation experiment for this scenario: {{ scenario }}.
You are studying the outcome "{{ outcome }}". One hypothesized cause of that outcome is "{{ variable }}".
Propose a concrete, measurable operationalization of this cause for the experiment.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"variable": "the cause restated as a short noun phrase", "operationalization": "how the cause will be concretely measured", "explanation": "short explanation"}"#;

pub const CLASSIFY_VARIABLE_TYPE: &str = r#"Classify the measurement type of the variable "{{ variable }}", operationalized as: {{ operationalization }}.
The possible types are:
- continuous: any real number in a range
- count: a non-negative integer count of events or items
- binary: exactly two levels
- ordinal: a small set of ordered levels
- nominal: unordered categories with no ranking
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"variable_type": "continuous, count, binary, ordinal, or nominal", "explanation": "short explanation"}"#;

pub const VARIABLE_UNITS: &str = r#"The {{ variable_type }} variable "{{ variable }}" is operationalized as: {{ operationalization }}.
State the units this variable is measured in. For binary or ordinal variables, describe what a level represents.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"units": "units of measurement", "explanation": "short explanation"}"#;

pub const CREATE_LEVELS: &str = r#"The {{ variable_type }} variable "{{ variable }}" is operationalized as: {{ operationalization }} and measured in {{ units }}.
List the levels this variable takes. For a binary variable give exactly two levels. For an ordinal variable give each level from lowest to highest. For a continuous or count variable give {{ num_levels }} representative values from low to high.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"levels": ["level 1", "level 2"], "explanation": "short explanation"}"#;

pub const MEASUREMENT_QUESTIONS: &str = r#"You are designing the post-simulation survey for the variable "{{ variable }}", operationalized as: {{ operationalization }} and measured in {{ units }}.
The participants are: {{ agents }}. Write one survey question per participant role that elicits this variable from that participant, and one question addressed to "oracle", an additional reader who saw the whole conversation transcript but did not take part.
Also pick how the per-participant answers should be aggregated into one number: average, sum, max, min, or mode.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"questions": {"role": "question for that role", "oracle": "question for the transcript reader"}, "aggregation": "average, sum, max, min, or mode", "explanation": "short explanation"}"#;

pub const PROPOSE_CAUSES: &str = r#"You are a social scientist studying this scenario: {{ scenario }}.
Propose exactly {{ num_causes }} plausible causes of the variable "{{ variable }}". Each cause must be a distinct, concrete factor a participant or the scenario could differ on. Do not propose any of the following, which are already in the model: {{ excluded }}.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"causes": ["first cause", "second cause"], "explanation": "short explanation"}"#;

pub const WHEN_DETERMINED: &str = r#"Consider the {{ variable_type }} variable "{{ variable }}", operationalized as: {{ operationalization }} and measured in {{ units }}, in this scenario: {{ scenario }}.
Is the value of this variable settled before the interaction between the participants begins, or is it determined during the interaction itself?
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"when_determined": "before the interaction or during the interaction", "explanation": "short explanation"}"#;

pub const VARIATION_SCOPE: &str = r#"The variable "{{ variable }}" is operationalized as: {{ operationalization }} in this scenario: {{ scenario }}.
Does this variable vary at the level of an individual participant (different participants can hold different values) or at the level of the scenario (one value shared by everyone in a given run)?
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"scope": "individual or scenario", "explanation": "short explanation"}"#;

pub const INDUCE_VARIATION_INDIVIDUAL: &str = r#"You are designing experimental variation for the {{ variable_type }} variable "{{ variable }}", operationalized as: {{ operationalization }} and measured in {{ units }}, in this scenario: {{ scenario }}.
The participants are: {{ agents }}. The variable varies at the individual level. Pick the single participant whose attribute will be varied, name the attribute as it would appear in that participant's profile, and give the list of values the attribute will take across experimental conditions, ordered from low to high where an order exists.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"attribute_name": "profile attribute to vary", "attribute_values": ["value 1", "value 2"], "varied_agent": "role of the participant who is varied", "explanation": "short explanation"}"#;

pub const INDUCE_VARIATION_SCENARIO: &str = r#"You are designing experimental variation for the {{ variable_type }} variable "{{ variable }}", operationalized as: {{ operationalization }} and measured in {{ units }}, in this scenario: {{ scenario }}.
The variable varies at the scenario level, so every participant in a given run shares the same value. Name the scenario attribute and give the list of values it will take across experimental conditions, ordered from low to high where an order exists.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"attribute_name": "scenario attribute to vary", "attribute_values": ["value 1", "value 2"], "explanation": "short explanation"}"#;

pub const ALIGN_VARIATION: &str = r#"The variable "{{ variable }}" will be varied with these values: {{ attribute_values }}.
Other numeric variables in the same experiment are varied like this: {{ siblings }}.
Adjust the value list for "{{ variable }}" so its range and granularity are comparable to the others, keeping the same number of values and their ascending order.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"attribute_values": ["value 1", "value 2"], "explanation": "short explanation"}"#;

pub const VISIBILITY_CHOICE: &str = r#"In this scenario: {{ scenario }}, the attribute "{{ attribute_name }}" of {{ varied_agent }} is varied with these values: {{ attribute_values }}.
Would the other participants realistically know this attribute (public), or is it private information only {{ varied_agent }} holds? If public, give the attribute name as the other participants would see it.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"choice": "public or private", "public_name": "attribute name as seen by others, or an empty string if private", "explanation": "short explanation"}"#;

pub const SELF_REVIEW: &str = r#"You previously received this prompt:

{{ prompt }}

and answered:

{{ response }}

Review your answer for mistakes: wrong classifications, values that do not fit the scenario, or fields that do not answer what was asked. Reply with the corrected answer in exactly the same json format as the original answer. If the answer was already correct, reply with it unchanged."#;

pub const REVIEW_VARIATION: &str = r#"You previously received this prompt:

{{ prompt }}

and answered:

{{ response }}

Review the attribute values in your answer: they must be realistic for the scenario, mutually distinct, and ordered from low to high where an order exists. Reply with the corrected answer in exactly the same json format as the original answer. If the answer was already correct, reply with it unchanged."#;

// =============================================================================
// Agent assembly
// =============================================================================

pub const AGENT_GOAL: &str = r#"You are setting up a simulation of this scenario: {{ scenario }} with these participants: {{ agents }}.
State the goal the {{ role }} is trying to accomplish in this scenario. The goal should be concrete and should concern this scenario only.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"goal": "the goal of the {{ role }}", "explanation": "short explanation"}"#;

pub const AGENT_CONSTRAINT: &str = r#"In a simulation of this scenario: {{ scenario }}, the {{ role }} has this goal: {{ goal }}.
State the main constraint that limits how the {{ role }} can pursue that goal, such as a budget, a rule, or an outside option.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"constraint": "the constraint on the {{ role }}", "explanation": "short explanation"}"#;

pub const NECESSARY_INFO: &str = r#"Consider the {{ role }} in this scenario: {{ scenario }}.
List the pieces of background information a real {{ role }} would hold going into this scenario: facts about themselves and their situation that shape how they behave.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"necessary_info": ["first piece of information", "second piece of information"], "explanation": "short explanation"}"#;

pub const INFO_TO_ATTRIBUTES: &str = r#"You are writing the profile of the {{ role }} in this scenario: {{ scenario }}.
The {{ role }} needs these pieces of background information: {{ info }}.
Turn each piece into a profile attribute with a concrete value: the attribute name states what it is, the value is specific (a number, a fact, a preference), and together they make a coherent person.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"attributes": {"attribute name": "concrete value"}, "explanation": "short explanation"}"#;

pub const ATTRIBUTES_REVIEW: &str = r#"You previously received this prompt:

{{ prompt }}

and answered:

{{ response }}

Review the attributes: every value must be concrete rather than a placeholder, the attributes must not contradict each other, and each must be information the person would actually hold. Reply with the corrected answer in exactly the same json format as the original answer. If the answer was already correct, reply with it unchanged."#;

pub const CHECK_INFO_MISMATCH: &str = r#"The {{ role }} in a simulation currently has this profile: {{ attributes }}.
The other participants have these profiles: {{ priors }}.
Check the {{ role }}'s profile for inconsistencies with the other profiles: shared facts that disagree, quantities that do not add up across participants, or references to things no other participant holds. Keep every attribute name unchanged; correct only the values that conflict.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"attributes": {"attribute name": "corrected value"}, "explanation": "short explanation"}"#;

pub const AGENT_NAMES: &str = r#"Give a realistic first name to each of these participants, in order: {{ roles }}.
The names must be pairwise distinct.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"names": ["name for the first role", "name for the second role"], "explanation": "short explanation"}"#;

pub const INTERACTION_TYPE: &str = r#"You are choosing how speaking turns are scheduled in a simulation of this scenario: {{ scenario }} with these participants: {{ agents }}.
The possible schedules are:
- ordered: participants speak in a fixed rotation
- random: each turn goes to a participant drawn at random
- center_ordered: a central participant speaks every other turn, the rest rotate between their turns
- center_random: a central participant speaks every other turn, the rest are drawn at random
- oracle_prescriptive: an outside reader picks the next speaker from the transcript each turn
- oracle_post: an outside reader asks every participant for their private thoughts, then picks the next speaker
Pick the schedule that best matches how this scenario would naturally unfold.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"interaction_type": "one of the schedules above", "explanation": "short explanation"}"#;

pub const SPEAKING_ORDER: &str = r#"In a simulation of this scenario: {{ scenario }}, the participants speak in a fixed rotation. The participants are: {{ agents }}.
Give the rotation order, starting with whoever would naturally open the conversation. Use each role exactly once.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"order": ["first role to speak", "second role to speak"], "explanation": "short explanation"}"#;

pub const CENTRAL_AGENT: &str = r#"In a simulation of this scenario: {{ scenario }}, one central participant speaks every other turn. The participants are: {{ agents }}.
Pick the central participant: the one the conversation naturally flows through.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"central_agent": "role of the central participant", "explanation": "short explanation"}"#;

pub const CENTRAL_AGENT_WITH_ORDER: &str = r#"In a simulation of this scenario: {{ scenario }}, one central participant speaks every other turn and the remaining participants rotate in a fixed order between the central participant's turns. The participants are: {{ agents }}.
Pick the central participant and give the rotation order of the others.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"central_agent": "role of the central participant", "order": ["first other role", "second other role"], "explanation": "short explanation"}"#;

// =============================================================================
// Interaction turns
// =============================================================================

pub const STATEMENT: &str = r#"You are currently participating in a conversation in this scenario: {{ scenario }}.
So far, there have been {{ round }} total statements made in this conversation by all participants. There will be at most {{ n_left }} more statements by all participants before the conversation automatically ends.
The people participating in the scenario have these roles and names: {{ group_knowledge }}. {{ context }}
It is your turn to speak.
Remember that any information you wish to communicate must be stated directly to the other people you are speaking with.
Be concise and focus on accomplishing your goal within your constraints using a minimal number of words.
Provide your natural response to this conversation without any other text:"#;

pub const CONTINUE_OR_FINISH: &str = r#"You are a social scientist running a simulation of the following scenario: {{ scenario }}. You are studying the behavior of these participants: {{ group_knowledge }}. Here is the conversation between the participants so far: {{ history }}.
Determine whether the conversation should continue or whether it is complete, based on what makes the most sense given the conversation so far. If the participants seem to be mid-conversation, it should continue. If they are wrapping up the way a normal conversation ends, it is complete.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"explanation": "short explanation for whether the simulation is complete or should continue", "choice": "complete or continue"}"#;

pub const AGENT_SURVEY: &str = r#"{{ context }}
Your task is to answer the following question: "{{ question }}". When answering, keep the following in mind:
1. Base your answer first on your personal characteristics and on the conversation you just had.
2. The conversation was run as an experiment testing the effect of varying these attributes: {{ exogenous }}.
Your answer will be used directly to measure "{{ variable }}", which is operationalized as: {{ operationalization }}.
Answer as accurately as you can within the context of your characteristics and conversation; only if you truly cannot answer, say that you do not know.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"explanation": "short explanation for your answer", "answer": "your answer to the question"}"#;

pub const AGENT_THOUGHTS: &str = r#"You are {{ name }}, the {{ role }} in a conversation in this scenario: {{ scenario }}.
Here is the conversation so far: {{ history }}.
The other participants have privately shared these thoughts so far: {{ responses }}.
The participants are: {{ agents }}.
In one or two sentences, state your private thoughts on where the conversation stands and what you would want to say next. This is not a public statement."#;

pub const ORACLE_PRESCRIPTIVE: &str = r#"You are reading the live transcript of a conversation in this scenario: {{ scenario }}.
Here is the conversation so far: {{ history }}.
The participants are: {{ agents }}.
Pick which participant should speak next so the conversation unfolds naturally.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"choice_of_next_agent": "role of the participant who should speak next", "explanation": "short explanation"}"#;

pub const ORACLE_POST: &str = r#"You are reading the live transcript of a conversation in this scenario: {{ scenario }}.
Here is the conversation so far: {{ history }}.
Each participant has privately shared their current thoughts: {{ thoughts }}.
The participants are: {{ agents }}.
Given the transcript and the private thoughts, pick which participant should speak next so the conversation unfolds naturally.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"choice_of_next_agent": "role of the participant who should speak next", "explanation": "short explanation"}"#;

pub const ORACLE_SURVEY: &str = r#"You are an additional reader who observed the whole conversation transcript of a simulation of this scenario: {{ scenario }}, but did not take part in it.
Here is the full transcript: {{ history }}.
Your task is to answer the following question about the conversation: "{{ question }}".
Your answer will be used directly to measure "{{ variable }}", which is operationalized as: {{ operationalization }}.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"explanation": "short explanation for your answer", "answer": "your answer to the question"}"#;

// =============================================================================
// Survey parsing
// =============================================================================

pub const COERCE_CONTINUOUS: &str = r#"The continuous variable "{{ variable }}" is operationalized as: {{ operationalization }} and measured in {{ units }}.
The {{ respondent }} was asked: "{{ question }}" and answered: {{ response }}.
Extract the numeric value of the variable from the answer, as a plain number with no units. If the answer does not contain one, reply with "na".
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"answer": "the numeric value or na", "explanation": "short explanation"}"#;

pub const COERCE_COUNT: &str = r#"The count variable "{{ variable }}" is operationalized as: {{ operationalization }} and measured in {{ units }}.
The {{ respondent }} was asked: "{{ question }}" and answered: {{ response }}.
Extract the count from the answer, as a plain non-negative integer with no units. If the answer does not contain one, reply with "na".
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"answer": "the integer count or na", "explanation": "short explanation"}"#;

pub const COERCE_BINARY: &str = r#"The binary variable "{{ variable }}" is operationalized as: {{ operationalization }}.
Its levels are coded as: {{ level_codes }}.
The {{ respondent }} was asked: "{{ question }}" and answered: {{ response }}.
Match the answer to one of the levels and reply with that level's code. If the answer matches no level, reply with "na".
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"answer": "the code of the matched level or na", "explanation": "short explanation"}"#;

pub const COERCE_ORDINAL: &str = r#"The ordinal variable "{{ variable }}" is operationalized as: {{ operationalization }}.
Its levels are coded from lowest to highest as: {{ level_codes }}.
The {{ respondent }} was asked: "{{ question }}" and answered: {{ response }}.
Match the answer to one of the levels and reply with that level's code. If the answer matches no level, reply with "na".
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"answer": "the code of the matched level or na", "explanation": "short explanation"}"#;

pub const COERCE_NOMINAL: &str = r#"The nominal variable "{{ variable }}" is operationalized as: {{ operationalization }}.
Its categories are coded as: {{ level_codes }}.
The {{ respondent }} was asked: "{{ question }}" and answered: {{ response }}.
Match the answer to one of the categories and reply with that category's code. If the answer matches no category, reply with "na".
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"answer": "the code of the matched category or na", "explanation": "short explanation"}"#;

pub const AGGREGATION_CHECK: &str = r#"The variable "{{ variable }}" was measured by asking each participant: "{{ question }}".
The declared way to aggregate the per-participant answers into one number is: {{ aggregation }}.
Confirm the aggregation method, or correct it if another of average, sum, max, min, or mode is clearly more appropriate for this measurement.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"aggregation": "average, sum, max, min, or mode", "explanation": "short explanation"}"#;

// =============================================================================
// Scenario proposals
// =============================================================================

pub const PROPOSE_ACTORS: &str = r#"Consider this scenario: {{ scenario }}.
List the individual human participants this scenario needs, one role per participant, each singular (for example "buyer", not "buyers"). Do not include groups, organizations, or observers.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"agents": ["first role", "second role"], "explanation": "short explanation"}"#;

pub const PROPOSE_OUTCOMES: &str = r#"You are a social scientist studying this scenario: {{ scenario }} with these participants: {{ agents }}.
Propose outcomes of the interaction that would be worth measuring in an experiment. Each outcome should be a short noun phrase describing something determined by how the interaction goes.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"outcomes": ["first outcome", "second outcome"], "explanation": "short explanation"}"#;

pub const PROPOSE_MORE_OUTCOMES: &str = r#"You are a social scientist studying this scenario: {{ scenario }} with these participants: {{ agents }}.
You already have these outcomes: {{ outcomes }}.
Propose additional outcomes of the interaction worth measuring, distinct from the ones above. Each outcome should be a short noun phrase describing something determined by how the interaction goes.
Format your response as a json in this form and make sure that all keys and items are in double quotes: {"outcomes": ["first new outcome", "second new outcome"], "explanation": "short explanation"}"#;

/// Registration table for [`crate::prompts::PromptLibrary::builtin`].
pub(crate) const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    // Variable elicitation
    ("operationalize_outcome", OPERATIONALIZE_OUTCOME),
    ("operationalize_cause", OPERATIONALIZE_CAUSE),
    ("classify_variable_type", CLASSIFY_VARIABLE_TYPE),
    ("variable_units", VARIABLE_UNITS),
    ("create_levels", CREATE_LEVELS),
    ("measurement_questions", MEASUREMENT_QUESTIONS),
    ("propose_causes", PROPOSE_CAUSES),
    ("when_determined", WHEN_DETERMINED),
    ("variation_scope", VARIATION_SCOPE),
    ("induce_variation_individual", INDUCE_VARIATION_INDIVIDUAL),
    ("induce_variation_scenario", INDUCE_VARIATION_SCENARIO),
    ("align_variation", ALIGN_VARIATION),
    ("visibility_choice", VISIBILITY_CHOICE),
    ("self_review", SELF_REVIEW),
    ("review_variation", REVIEW_VARIATION),
    // Agent assembly
    ("agent_goal", AGENT_GOAL),
    ("agent_constraint", AGENT_CONSTRAINT),
    ("necessary_info", NECESSARY_INFO),
    ("info_to_attributes", INFO_TO_ATTRIBUTES),
    ("attributes_review", ATTRIBUTES_REVIEW),
    ("check_info_mismatch", CHECK_INFO_MISMATCH),
    ("agent_names", AGENT_NAMES),
    ("interaction_type", INTERACTION_TYPE),
    ("speaking_order", SPEAKING_ORDER),
    ("central_agent", CENTRAL_AGENT),
    ("central_agent_with_order", CENTRAL_AGENT_WITH_ORDER),
    // Interaction turns
    ("statement", STATEMENT),
    ("continue_or_finish", CONTINUE_OR_FINISH),
    ("agent_survey", AGENT_SURVEY),
    ("agent_thoughts", AGENT_THOUGHTS),
    ("oracle_prescriptive", ORACLE_PRESCRIPTIVE),
    ("oracle_post", ORACLE_POST),
    ("oracle_survey", ORACLE_SURVEY),
    // Survey parsing
    ("coerce_continuous", COERCE_CONTINUOUS),
    ("coerce_count", COERCE_COUNT),
    ("coerce_binary", COERCE_BINARY),
    ("coerce_ordinal", COERCE_ORDINAL),
    ("coerce_nominal", COERCE_NOMINAL),
    ("aggregation_check", AGGREGATION_CHECK),
    // Scenario proposals
    ("propose_actors", PROPOSE_ACTORS),
    ("propose_outcomes", PROPOSE_OUTCOMES),
    ("propose_more_outcomes", PROPOSE_MORE_OUTCOMES),
];
